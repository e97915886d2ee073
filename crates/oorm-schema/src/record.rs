//! Record types and lifecycle hooks.
//!
//! A [`Record`] is any `Facet` struct; its columns are read off the shape.
//! [`RecordType`] carries the shape plus a hook runner so the rest of the
//! crate can work with records whose type is only known at runtime.

use facet::{Facet, Shape};

use crate::{ATTR_NS, Entity, HookResult, SchemaError, SchemaRegistry, registered_tables};

/// A type that maps to a table.
///
/// Hooks default to no-ops; override the ones the type needs. A hook error
/// aborts the surrounding operation.
pub trait Record: Facet<'static> + Send + Sync + 'static {
    fn after_query(&mut self) -> HookResult {
        Ok(())
    }

    fn before_create(&mut self) -> HookResult {
        Ok(())
    }

    fn after_create(&mut self) -> HookResult {
        Ok(())
    }

    fn before_update(&mut self) -> HookResult {
        Ok(())
    }

    fn after_update(&mut self) -> HookResult {
        Ok(())
    }

    fn before_delete(&mut self) -> HookResult {
        Ok(())
    }

    fn after_delete(&mut self) -> HookResult {
        Ok(())
    }
}

/// Lifecycle hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    AfterQuery,
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

impl Hook {
    /// Run this hook on a typed record.
    pub fn run<R: Record>(self, record: &mut R) -> HookResult {
        match self {
            Hook::AfterQuery => record.after_query(),
            Hook::BeforeCreate => record.before_create(),
            Hook::AfterCreate => record.after_create(),
            Hook::BeforeUpdate => record.before_update(),
            Hook::AfterUpdate => record.after_update(),
            Hook::BeforeDelete => record.before_delete(),
            Hook::AfterDelete => record.after_delete(),
        }
    }
}

type HookFn = fn(&SchemaRegistry, &mut Entity, Hook) -> Result<HookResult, SchemaError>;

/// Runtime descriptor of a record type.
#[derive(Clone, Copy)]
pub struct RecordType {
    shape: &'static Shape,
    hook: Option<HookFn>,
}

impl RecordType {
    pub const fn of<R: Record>() -> Self {
        Self {
            shape: R::SHAPE,
            hook: Some(run_hook::<R> as HookFn),
        }
    }

    /// Descriptor of a record type seen only through a field's shape.
    ///
    /// Hooks run only when the type was registered through a [`TableDef`](crate::TableDef).
    pub fn of_shape(shape: &'static Shape) -> Self {
        registered_tables()
            .into_iter()
            .find(|ty| ty.shape == shape)
            .unwrap_or(Self { shape, hook: None })
    }

    pub fn shape(&self) -> &'static Shape {
        self.shape
    }

    /// Unqualified type name, e.g. `User`.
    pub fn type_name(&self) -> &'static str {
        self.shape.type_identifier
    }

    /// Table name set with `#[facet(oorm::table = "...")]`.
    pub fn table_override(&self) -> Option<&'static str> {
        self.shape.attributes.iter().find_map(|attr| {
            if attr.ns == Some(ATTR_NS) && attr.key == "table" {
                attr.get_as::<&str>().copied()
            } else {
                None
            }
        })
    }

    /// Run a hook on an entity of this type, writing the hook's changes back.
    pub fn run_hook(
        &self,
        registry: &SchemaRegistry,
        entity: &mut Entity,
        hook: Hook,
    ) -> Result<HookResult, SchemaError> {
        match self.hook {
            Some(run) => run(registry, entity, hook),
            None => Ok(Ok(())),
        }
    }
}

impl PartialEq for RecordType {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape
    }
}

impl std::fmt::Debug for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RecordType").field(&self.type_name()).finish()
    }
}

fn run_hook<R: Record>(
    registry: &SchemaRegistry,
    entity: &mut Entity,
    hook: Hook,
) -> Result<HookResult, SchemaError> {
    let mut record = entity.to_record::<R>()?;
    let result = hook.run(&mut record);
    let schema = std::sync::Arc::clone(entity.schema());
    *entity = Entity::from_record(registry, schema, &record)?;
    Ok(result)
}
