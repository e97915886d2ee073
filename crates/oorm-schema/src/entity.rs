//! Records in column form.
//!
//! An [`Entity`] holds one value per schema field plus the related entities
//! of each relation. Typed records are read into entities through `Peek` and
//! rebuilt from them through `Partial`, so everything between the caller and
//! the database works on entities alone.

use std::fmt;
use std::sync::Arc;

use facet::Facet;
use facet_reflect::{Partial, Peek, PeekStruct};
use oorm_sql::Value;

use crate::schema::Slot;
use crate::{Cardinality, RecordType, Schema, SchemaError, SchemaRegistry};

/// A record of some type, held as column values.
#[derive(Clone)]
pub struct Entity {
    schema: Arc<Schema>,
    pub(crate) values: Vec<Value>,
    pub(crate) related: Vec<Vec<Entity>>,
}

impl Entity {
    /// An entity with every column at its zero value and no related entities.
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = schema.fields.iter().map(|f| f.storage.zero()).collect();
        let related = vec![Vec::new(); schema.relations.len()];
        Self {
            schema,
            values,
            related,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn record_type(&self) -> &RecordType {
        self.schema.record_type()
    }

    /// Read a typed record, including the records held by its relations.
    pub fn from_record<R: Facet<'static>>(
        registry: &SchemaRegistry,
        schema: Arc<Schema>,
        record: &R,
    ) -> Result<Self, SchemaError> {
        Self::from_peek(registry, schema, Peek::new(record))
    }

    fn from_peek(
        registry: &SchemaRegistry,
        schema: Arc<Schema>,
        peek: Peek<'_, '_>,
    ) -> Result<Self, SchemaError> {
        let mut entity = Entity::new(Arc::clone(&schema));
        entity.read(registry, &schema, &schema.layout, peek)?;
        Ok(entity)
    }

    fn read(
        &mut self,
        registry: &SchemaRegistry,
        schema: &Schema,
        layout: &[Slot],
        peek: Peek<'_, '_>,
    ) -> Result<(), SchemaError> {
        let peek = peek.into_struct()?;
        for (i, slot) in layout.iter().enumerate() {
            match slot {
                Slot::Skip => {}
                Slot::Column(c) => {
                    let field = &schema.fields[*c];
                    self.values[*c] = field
                        .storage
                        .read(nth_field(&peek, i)?)
                        .map_err(|e| e.in_column(&field.column))?;
                }
                Slot::Relation(r) => {
                    let relation = &schema.relations[*r];
                    let related = registry.schema_of(relation.related_type())?;
                    let held = nth_field(&peek, i)?;
                    let children: Vec<Peek<'_, '_>> = match relation.cardinality {
                        Cardinality::One => held.into_option()?.value().into_iter().collect(),
                        Cardinality::Many => held.into_list()?.iter().collect(),
                    };
                    self.related[*r] = children
                        .into_iter()
                        .map(|child| Entity::from_peek(registry, Arc::clone(&related), child))
                        .collect::<Result<_, _>>()?;
                }
                Slot::Embedded(inner) => {
                    self.read(registry, schema, inner, nth_field(&peek, i)?)?;
                }
            }
        }
        Ok(())
    }

    /// Build a typed record, including the records held by its relations.
    pub fn to_record<R: Facet<'static>>(&self) -> Result<R, SchemaError> {
        let partial = Partial::alloc_owned::<R>()?;
        let partial = self.write(&self.schema.layout, partial)?;
        let heap_value = partial.build()?;
        Ok(heap_value.materialize()?)
    }

    fn write(
        &self,
        layout: &[Slot],
        partial: Partial<'static, false>,
    ) -> Result<Partial<'static, false>, SchemaError> {
        let mut partial = partial;
        for (i, slot) in layout.iter().enumerate() {
            partial = match slot {
                Slot::Skip => partial.set_nth_field_to_default(i)?,
                Slot::Column(c) => {
                    let field = &self.schema.fields[*c];
                    let inner = partial.begin_nth_field(i)?;
                    field
                        .storage
                        .write(inner, &self.values[*c])
                        .map_err(|e| e.in_column(&field.column))?
                        .end()?
                }
                Slot::Relation(r) => {
                    let relation = &self.schema.relations[*r];
                    let mut inner = partial.begin_nth_field(i)?;
                    match relation.cardinality {
                        Cardinality::One => match self.related[*r].first() {
                            Some(child) => {
                                inner = inner.begin_some()?;
                                inner = child.write(&child.schema.layout, inner)?;
                                inner = inner.end()?;
                            }
                            None => inner = inner.set_default()?,
                        },
                        Cardinality::Many => {
                            inner = inner.init_list()?;
                            for child in &self.related[*r] {
                                inner = inner.begin_list_item()?;
                                inner = child.write(&child.schema.layout, inner)?;
                                inner = inner.end()?;
                            }
                        }
                    }
                    inner.end()?
                }
                Slot::Embedded(inner) => {
                    let nested = partial.begin_nth_field(i)?;
                    self.write(inner, nested)?.end()?
                }
            };
        }
        Ok(partial)
    }
}

fn nth_field<'mem, 'facet>(
    peek: &PeekStruct<'mem, 'facet>,
    index: usize,
) -> Result<Peek<'mem, 'facet>, SchemaError> {
    peek.field(index)
        .map_err(|e| SchemaError::FieldAccess(e.to_string()))
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.schema.type_name);
        for field in &self.schema.fields {
            s.field(&field.name, &self.values[field.index]);
        }
        for relation in self.schema.relations.values() {
            s.field(&relation.name, &self.related[relation.index]);
        }
        s.finish()
    }
}
