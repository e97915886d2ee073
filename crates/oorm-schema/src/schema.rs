//! Declared table model and its extraction from a record shape.

use std::collections::HashMap;

use facet::{Shape, Type, UserType};
use indexmap::IndexMap;
use oorm_sql::Value;

use crate::column::{FieldKind, Storage, classify};
use crate::{
    ATTR_NS, DataType, Dialect, Entity, RecordType, SchemaError, TagSettings, parse_tag,
    snake_case,
};

/// The `default` setting value that means SQL NULL.
pub const NULL_DEFAULT: &str = "NULL";

/// A column of a declared table.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Rust field name.
    pub name: String,
    /// Column name.
    pub column: String,
    pub data_type: DataType,
    /// Bit width for numbers, character length for strings, fractional-second
    /// precision for times.
    pub size: u32,
    /// Precision spec for exact numerics (`decimal:10,2`).
    pub decimal: Option<String>,
    pub primary_key: bool,
    pub auto_increment: bool,
    /// Default value literal; [`NULL_DEFAULT`] for SQL NULL.
    pub default: Option<String>,
    pub comment: Option<String>,
    /// Stored as a JSON document.
    pub json: bool,
    /// Pass-through select expression; raw fields are never written or migrated.
    pub raw: Option<String>,
    /// Column type as rendered by the dialect.
    pub sql_type: String,
    pub settings: TagSettings,
    /// Came from an embedded record.
    pub embedded: bool,
    /// Position in [`Schema::fields`] and in an entity's values.
    pub(crate) index: usize,
    pub(crate) storage: Storage,
}

impl Field {
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// True when the declared default is SQL NULL.
    pub fn default_is_null(&self) -> bool {
        self.default.as_deref() == Some(NULL_DEFAULT)
    }

    pub fn nullable(&self) -> bool {
        self.storage.nullable()
    }

    /// Read this field from an entity.
    pub fn get<'a>(&self, entity: &'a Entity) -> &'a Value {
        &entity.values[self.index]
    }

    /// Write this field on an entity, converting `value` to the field's type.
    ///
    /// NULL into a non-nullable field keeps the current value.
    pub fn set(&self, entity: &mut Entity, value: Value) -> Result<(), SchemaError> {
        if value.is_null() && !self.nullable() {
            return Ok(());
        }
        entity.values[self.index] = self
            .storage
            .coerce(&value)
            .map_err(|e| e.in_column(&self.column))?;
        Ok(())
    }
}

/// Kinds of index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Primary,
    Unique,
    Plain,
    Fulltext,
}

impl IndexKind {
    /// Secondary index kinds, in the order they are rendered.
    pub const SECONDARY: [IndexKind; 3] = [IndexKind::Unique, IndexKind::Plain, IndexKind::Fulltext];

    /// Keyword used in `CREATE TABLE` and `SHOW CREATE TABLE`.
    pub fn keyword(self) -> &'static str {
        match self {
            IndexKind::Primary => "PRIMARY KEY",
            IndexKind::Unique => "UNIQUE KEY",
            IndexKind::Plain => "KEY",
            IndexKind::Fulltext => "FULLTEXT KEY",
        }
    }

    /// Tag setting that declares this kind.
    pub fn tag_key(self) -> Option<&'static str> {
        match self {
            IndexKind::Primary => None,
            IndexKind::Unique => Some("unique"),
            IndexKind::Plain => Some("index"),
            IndexKind::Fulltext => Some("full"),
        }
    }

    /// Suffix appended to declared index names.
    pub fn suffix(self) -> &'static str {
        match self {
            IndexKind::Primary => "",
            IndexKind::Unique => "_uni",
            IndexKind::Plain => "_key",
            IndexKind::Fulltext => "_full",
        }
    }
}

/// One column of a declared index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPart {
    pub column: String,
    pub priority: i64,
    /// Declaration order, breaks priority ties.
    pub position: usize,
}

/// Index name to its parts, in declaration order.
pub type IndexList = IndexMap<String, Vec<IndexPart>>;

/// Columns of an index, ordered by priority then declaration order.
pub fn ordered_columns(parts: &[IndexPart]) -> Vec<String> {
    let mut parts: Vec<&IndexPart> = parts.iter().collect();
    parts.sort_by_key(|p| (p.priority, p.position));
    parts.into_iter().map(|p| p.column.clone()).collect()
}

/// Relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// A named relation from one table to another.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub name: String,
    pub cardinality: Cardinality,
    pub related_table: String,
    /// Column on the owning table.
    pub local_key: String,
    /// Column on the related table.
    pub foreign_key: String,
    /// Position in [`Schema::relations`].
    pub(crate) index: usize,
    related: RecordType,
}

impl Relation {
    pub fn related_type(&self) -> &RecordType {
        &self.related
    }

    /// Related entities currently held by `owner`.
    pub fn get<'a>(&self, owner: &'a Entity) -> &'a [Entity] {
        &owner.related[self.index]
    }

    /// Replace the related entities held by `owner`. A to-one relation keeps
    /// the first.
    pub fn assign(&self, owner: &mut Entity, mut related: Vec<Entity>) {
        if self.cardinality == Cardinality::One {
            related.truncate(1);
        }
        owner.related[self.index] = related;
    }

    /// Move the related entities out of `owner`, leaving the field empty.
    pub fn take(&self, owner: &mut Entity) -> Vec<Entity> {
        std::mem::take(&mut owner.related[self.index])
    }
}

/// Where each field of a record's shape lands in an [`Entity`], in field order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Column(usize),
    Relation(usize),
    Embedded(Vec<Slot>),
    /// An embedded field shadowed by a direct one; left at its default.
    Skip,
}

/// The declared model of one table.
#[derive(Debug, Clone)]
pub struct Schema {
    pub type_name: &'static str,
    pub table: String,
    pub prefix: String,
    pub fields: Vec<Field>,
    lookup: HashMap<String, usize>,
    primary_key: Option<usize>,
    pub unique_keys: IndexList,
    pub index_keys: IndexList,
    pub fulltext_keys: IndexList,
    pub relations: IndexMap<String, Relation>,
    record: RecordType,
    pub(crate) layout: Vec<Slot>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name
            && self.table == other.table
            && self.prefix == other.prefix
            && self.fields == other.fields
            && self.primary_key == other.primary_key
            && self.unique_keys == other.unique_keys
            && self.index_keys == other.index_keys
            && self.fulltext_keys == other.fulltext_keys
            && self.relations == other.relations
    }
}

impl Schema {
    /// Look a field up by column name or Rust field name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.lookup.get(name).map(|&i| &self.fields[i])
    }

    pub fn primary_key(&self) -> Option<&Field> {
        self.primary_key.map(|i| &self.fields[i])
    }

    /// Column names in declaration order.
    pub fn columns(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.column.as_str()).collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.fields.iter().any(|f| f.column == column)
    }

    /// Look a relation up by field name or its snake_case form.
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name).or_else(|| {
            let wanted = snake_case(name);
            self.relations
                .values()
                .find(|r| snake_case(&r.name) == wanted)
        })
    }

    /// Secondary indexes of one kind; `None` for [`IndexKind::Primary`].
    pub fn indexes(&self, kind: IndexKind) -> Option<&IndexList> {
        match kind {
            IndexKind::Primary => None,
            IndexKind::Unique => Some(&self.unique_keys),
            IndexKind::Plain => Some(&self.index_keys),
            IndexKind::Fulltext => Some(&self.fulltext_keys),
        }
    }

    pub fn record_type(&self) -> &RecordType {
        &self.record
    }

    /// Build the schema of `ty`.
    ///
    /// Relations are resolved against the related type's plain columns only,
    /// so mutually-referencing types never recurse here.
    pub fn build(ty: &RecordType, dialect: &dyn Dialect, prefix: &str) -> Result<Schema, SchemaError> {
        let table = table_name(ty, prefix);

        let mut pending = Vec::new();
        for slot in collect_slots(entries(ty.shape())?, &table)? {
            pending.push(match slot {
                Slotted::Field(entry) => Pending::Field(Draft::field(ty, &entry)?),
                Slotted::Relation(entry) => Pending::Relation(entry),
            });
        }

        let owner_fields: Vec<&Draft> = pending
            .iter()
            .filter_map(|p| match p {
                Pending::Field(draft) => Some(draft),
                Pending::Relation(_) => None,
            })
            .collect();
        let primary_key = single_primary_key(&table, &owner_fields)?;

        let mut resolved = Vec::new();
        let mut relation_paths = Vec::new();
        for p in &pending {
            if let Pending::Relation(entry) = p {
                let relation = resolve_relation(ty, prefix, entry, &owner_fields, primary_key)?;
                relation_paths.push(relation.as_ref().map(|_| entry.path.clone()));
                resolved.push(relation);
            }
        }
        let mut resolved = resolved.into_iter();

        let mut fields = Vec::new();
        let mut relations = IndexMap::new();
        for p in pending {
            match p {
                Pending::Field(draft) => fields.push(draft),
                Pending::Relation(entry) => match resolved.next().flatten() {
                    Some(mut relation) => {
                        relation.index = relations.len();
                        relations.insert(entry.name.clone(), relation);
                    }
                    None => {
                        tracing::trace!(
                            table = %table,
                            field = %entry.name,
                            "foreign key not found on related type, storing as json"
                        );
                        fields.push(Draft::json_fallback(ty, &entry)?);
                    }
                },
            }
        }

        let mut lookup = HashMap::new();
        for (i, field) in fields.iter().enumerate() {
            if lookup.insert(field.column.clone(), i).is_some() {
                return Err(SchemaError::DuplicateColumn {
                    table,
                    column: field.column.clone(),
                });
            }
        }
        for (i, field) in fields.iter().enumerate() {
            lookup.entry(field.name.clone()).or_insert(i);
        }

        let mut schema = Schema {
            type_name: ty.type_name(),
            table,
            prefix: prefix.to_owned(),
            fields: Vec::with_capacity(fields.len()),
            lookup,
            primary_key: None,
            unique_keys: IndexList::new(),
            index_keys: IndexList::new(),
            fulltext_keys: IndexList::new(),
            relations,
            record: *ty,
            layout: Vec::new(),
        };

        let mut paths = Vec::with_capacity(fields.len());
        for (position, draft) in fields.into_iter().enumerate() {
            schema.add_indexes(ty, &draft, position)?;
            if draft.primary_key {
                schema.primary_key = Some(position);
            }
            paths.push(draft.path.clone());
            let mut field = draft.into_field(position);
            field.sql_type = dialect.column_type(&field);
            schema.fields.push(field);
        }

        let relation_paths: Vec<Vec<usize>> = relation_paths.into_iter().flatten().collect();
        schema.layout = layout(ty.shape(), &mut Vec::new(), &paths, &relation_paths)?;

        Ok(schema)
    }

    fn add_indexes(&mut self, ty: &RecordType, field: &Draft, position: usize) -> Result<(), SchemaError> {
        for kind in IndexKind::SECONDARY {
            let Some(key) = kind.tag_key() else { continue };
            let Some(spec) = field.settings.get(key) else {
                continue;
            };
            let (name, priority) = crate::tag::split_index_spec(spec);
            let name = if name.is_empty() { field.column.as_str() } else { name };
            let priority = if priority.is_empty() {
                0
            } else {
                priority.parse().map_err(|_| SchemaError::InvalidTag {
                    owner: ty.type_name().to_owned(),
                    field: field.name.clone(),
                    key: key.to_owned(),
                    value: spec.clone(),
                })?
            };

            let list = match kind {
                IndexKind::Unique => &mut self.unique_keys,
                IndexKind::Plain => &mut self.index_keys,
                _ => &mut self.fulltext_keys,
            };
            list.entry(format!("{name}{}", kind.suffix()))
                .or_default()
                .push(IndexPart {
                    column: field.column.clone(),
                    priority,
                    position,
                });
        }
        Ok(())
    }
}

/// Table name of a record type: the override, or `prefix + snake_case(TypeName)`.
pub fn table_name(ty: &RecordType, prefix: &str) -> String {
    match ty.table_override() {
        Some(name) => name.to_owned(),
        None => format!("{prefix}{}", snake_case(ty.type_name())),
    }
}

/// Table name without the prefix; the default foreign key is built from it.
fn base_table_name(ty: &RecordType) -> String {
    table_name(ty, "")
}

// ============================================================================
// Shape walk
// ============================================================================

/// A column as declared, before tag settings are applied.
#[derive(Clone)]
struct FieldEntry {
    name: String,
    settings: TagSettings,
    storage: Storage,
    /// Field indexes from the record down through embedded structs.
    path: Vec<usize>,
    embedded: bool,
}

/// A record-typed field that may turn out to be a relation.
#[derive(Clone)]
struct RelationEntry {
    name: String,
    settings: TagSettings,
    cardinality: Cardinality,
    related: RecordType,
    path: Vec<usize>,
    embedded: bool,
}

impl RelationEntry {
    /// Column storage used when the foreign key does not resolve.
    fn fallback(&self) -> FieldEntry {
        FieldEntry {
            name: self.name.clone(),
            settings: self.settings.clone(),
            storage: Storage::Json {
                nullable: self.cardinality == Cardinality::One,
                wrapped: false,
            },
            path: self.path.clone(),
            embedded: self.embedded,
        }
    }
}

enum Entry {
    Field(FieldEntry),
    Relation(RelationEntry),
}

fn struct_fields(shape: &'static Shape) -> Result<&'static [facet::Field], SchemaError> {
    match &shape.ty {
        Type::User(UserType::Struct(s)) => Ok(s.fields),
        _ => Err(SchemaError::NotAStruct {
            type_name: shape.type_identifier,
        }),
    }
}

/// Check if a field has an oorm attribute.
fn field_has_attr(field: &facet::Field, key: &str) -> bool {
    field
        .attributes
        .iter()
        .any(|attr| attr.ns == Some(ATTR_NS) && attr.key == key)
}

/// Get a string value from an oorm attribute on a field.
fn field_attr_str(field: &facet::Field, key: &str) -> Option<&'static str> {
    field.attributes.iter().find_map(|attr| {
        if attr.ns == Some(ATTR_NS) && attr.key == key {
            attr.get_as::<&str>().copied()
        } else {
            None
        }
    })
}

/// Entries of a record shape in declaration order, embedded structs flattened.
fn entries(shape: &'static Shape) -> Result<Vec<Entry>, SchemaError> {
    let mut out = Vec::new();
    walk(shape, &mut Vec::new(), false, &mut out)?;
    Ok(out)
}

fn walk(
    shape: &'static Shape,
    path: &mut Vec<usize>,
    embedded: bool,
    out: &mut Vec<Entry>,
) -> Result<(), SchemaError> {
    for (i, field) in struct_fields(shape)?.iter().enumerate() {
        path.push(i);
        let field_shape = field.shape.get();
        if field_has_attr(field, "embed") {
            walk(field_shape, path, true, out)?;
            path.pop();
            continue;
        }

        let settings = parse_tag(field_attr_str(field, "tag").unwrap_or_default());
        out.push(match classify(field_shape) {
            FieldKind::Column(storage) => Entry::Field(FieldEntry {
                name: field.name.to_owned(),
                settings,
                storage,
                path: path.clone(),
                embedded,
            }),
            FieldKind::Records { cardinality, shape } => Entry::Relation(RelationEntry {
                name: field.name.to_owned(),
                settings,
                cardinality,
                related: RecordType::of_shape(shape),
                path: path.clone(),
                embedded,
            }),
        });
        path.pop();
    }
    Ok(())
}

/// Map every field of `shape` to where it lives in an entity.
fn layout(
    shape: &'static Shape,
    path: &mut Vec<usize>,
    columns: &[Vec<usize>],
    relations: &[Vec<usize>],
) -> Result<Vec<Slot>, SchemaError> {
    let mut slots = Vec::new();
    for (i, field) in struct_fields(shape)?.iter().enumerate() {
        path.push(i);
        let slot = if field_has_attr(field, "embed") {
            Slot::Embedded(layout(field.shape.get(), path, columns, relations)?)
        } else if let Some(c) = columns.iter().position(|p| p == path) {
            Slot::Column(c)
        } else if let Some(r) = relations.iter().position(|p| p == path) {
            Slot::Relation(r)
        } else {
            Slot::Skip
        };
        slots.push(slot);
        path.pop();
    }
    Ok(slots)
}

// ============================================================================
// Field resolution
// ============================================================================

enum Slotted {
    Field(FieldEntry),
    Relation(RelationEntry),
}

fn column_of(entry: &FieldEntry) -> String {
    match entry.settings.get("field") {
        Some(column) if !column.is_empty() => column.clone(),
        _ => snake_case(&entry.name),
    }
}

/// Flatten entries, letting a directly declared field replace an embedded
/// field with the same column.
fn collect_slots(entries: Vec<Entry>, table: &str) -> Result<Vec<Slotted>, SchemaError> {
    let mut slots: Vec<Slotted> = Vec::new();
    // key -> (slot index, came from an embedded record)
    let mut seen: HashMap<String, (usize, bool)> = HashMap::new();

    for entry in entries {
        let (key, embedded, slot) = match entry {
            Entry::Field(field) => (column_of(&field), field.embedded, Slotted::Field(field)),
            Entry::Relation(relation) => (
                format!("relation:{}", relation.name),
                relation.embedded,
                Slotted::Relation(relation),
            ),
        };

        match seen.get(&key).copied() {
            None => {
                seen.insert(key, (slots.len(), embedded));
                slots.push(slot);
            }
            Some((i, true)) if !embedded => {
                seen.insert(key, (i, false));
                slots[i] = slot;
            }
            Some((_, false)) if embedded => {}
            Some(_) => {
                return Err(SchemaError::DuplicateColumn {
                    table: table.to_owned(),
                    column: key.trim_start_matches("relation:").to_owned(),
                });
            }
        }
    }

    Ok(slots)
}

enum Pending {
    Field(Draft),
    Relation(RelationEntry),
}

/// A field with its tag settings applied, before type rendering.
struct Draft {
    name: String,
    column: String,
    data_type: DataType,
    size: u32,
    decimal: Option<String>,
    primary_key: bool,
    auto_increment: bool,
    default: Option<String>,
    comment: Option<String>,
    json: bool,
    raw: Option<String>,
    settings: TagSettings,
    embedded: bool,
    path: Vec<usize>,
    storage: Storage,
}

impl Draft {
    fn field(ty: &RecordType, entry: &FieldEntry) -> Result<Draft, SchemaError> {
        let settings = &entry.settings;
        let storage = match entry.storage {
            Storage::Native { nullable, .. } if settings.contains_key("json") => Storage::Json {
                nullable,
                wrapped: false,
            },
            storage => storage,
        };
        let (data_type, natural_size, natural_decimal) = match storage {
            Storage::Native { scalar, .. } => (scalar.data_type(), scalar.size(), scalar.decimal()),
            Storage::Json { .. } => (DataType::Json, 0, None),
        };
        let json = data_type == DataType::Json;

        let size = match settings.get("size") {
            Some(size) => size.trim().parse().map_err(|_| SchemaError::InvalidTag {
                owner: ty.type_name().to_owned(),
                field: entry.name.clone(),
                key: "size".to_owned(),
                value: size.clone(),
            })?,
            None => natural_size,
        };

        let auto_increment = settings.contains_key("autoIncrement");
        let default = match settings.get("default") {
            Some(value) => Some(value.clone()),
            None if storage.nullable() => Some(NULL_DEFAULT.to_owned()),
            None => None,
        };

        Ok(Draft {
            name: entry.name.clone(),
            column: column_of(entry),
            data_type,
            size,
            decimal: settings
                .get("decimal")
                .cloned()
                .or_else(|| natural_decimal.map(str::to_owned)),
            primary_key: auto_increment || settings.contains_key("primaryKey"),
            auto_increment,
            default,
            comment: settings.get("comment").cloned(),
            json,
            raw: settings.get("raw").cloned(),
            settings: settings.clone(),
            embedded: entry.embedded,
            path: entry.path.clone(),
            storage,
        })
    }

    /// A relation-shaped field whose foreign key did not resolve.
    fn json_fallback(ty: &RecordType, entry: &RelationEntry) -> Result<Draft, SchemaError> {
        Draft::field(ty, &entry.fallback())
    }

    fn into_field(self, index: usize) -> Field {
        Field {
            name: self.name,
            column: self.column,
            data_type: self.data_type,
            size: self.size,
            decimal: self.decimal,
            primary_key: self.primary_key,
            auto_increment: self.auto_increment,
            default: self.default,
            comment: self.comment,
            json: self.json,
            raw: self.raw,
            sql_type: String::new(),
            settings: self.settings,
            embedded: self.embedded,
            index,
            storage: self.storage,
        }
    }

    fn matches(&self, name: &str) -> bool {
        self.column == name || self.name == name
    }
}

fn single_primary_key<'a>(table: &str, drafts: &[&'a Draft]) -> Result<Option<&'a Draft>, SchemaError> {
    let mut keys = drafts.iter().copied().filter(|d| d.primary_key);
    let first = keys.next();
    if let (Some(first), Some(second)) = (first, keys.next()) {
        return Err(SchemaError::MultiplePrimaryKeys {
            table: table.to_owned(),
            first: first.column.clone(),
            second: second.column.clone(),
        });
    }
    Ok(first)
}

/// Resolve the key pair of a relation; `None` when the foreign key does not
/// exist on the related type.
fn resolve_relation(
    owner: &RecordType,
    prefix: &str,
    entry: &RelationEntry,
    owner_fields: &[&Draft],
    primary_key: Option<&Draft>,
) -> Result<Option<Relation>, SchemaError> {
    if entry.settings.contains_key("json") {
        return Ok(None);
    }

    let foreign_key = match entry.settings.get("foreignKey") {
        Some(fk) if !fk.is_empty() => fk.clone(),
        _ => match primary_key {
            Some(pk) => format!("{}_{}", base_table_name(owner), pk.column),
            None => return Ok(None),
        },
    };

    let related_table = table_name(&entry.related, prefix);
    let related_columns: Vec<FieldEntry> = collect_slots(entries(entry.related.shape())?, &related_table)?
        .into_iter()
        .filter_map(|slot| match slot {
            Slotted::Field(field) => Some(field),
            Slotted::Relation(_) => None,
        })
        .collect();
    let Some(foreign) = related_columns
        .iter()
        .find(|f| column_of(f) == foreign_key || f.name == foreign_key)
    else {
        return Ok(None);
    };

    let local_key = match entry.settings.get("localKey") {
        Some(lk) if !lk.is_empty() => owner_fields.iter().copied().find(|f| f.matches(lk)),
        _ => primary_key,
    };
    let Some(local_key) = local_key else {
        return Err(SchemaError::MissingLocalKey {
            table: base_table_name(owner),
            relation: entry.name.clone(),
        });
    };

    Ok(Some(Relation {
        name: entry.name.clone(),
        cardinality: entry.cardinality,
        related_table,
        local_key: local_key.column.clone(),
        foreign_key: column_of(foreign),
        index: 0,
        related: entry.related,
    }))
}
