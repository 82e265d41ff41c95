//! Binding a lineage's primary schema to a Rust type
//!
//! A host type describes its members through a [`TypeDescriptor`]. Binding
//! checks, field by field and in schema declaration order, that every instance
//! valid under the primary schema can be decoded into the host type. The
//! result is a [`ConvergentLineage`], which decodes instances of any version
//! straight into the host type.
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct PluginDef { id: String, name: String, info: Option<Info> }
//!
//! impl HostType for PluginDef {
//!     fn descriptor() -> TypeDescriptor {
//!         TypeDescriptor::new("PluginDef")
//!             .member::<String>("id")
//!             .member::<String>("name")
//!             .optional_nested::<Info>("info")
//!     }
//! }
//!
//! let plugins = TypeBinder::new().bind::<PluginDef>(Arc::new(lineage))?;
//! let def: PluginDef = plugins.decode(&raw, sv(0, 1))?;
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{LineageError, Result};
use crate::invariant::Invariant;
use crate::lineage::{Lineage, SchemaNode};
use crate::schema::{join_path, FieldDef, FieldType, ObjectShape, ShapeMismatch};
use crate::translate::Translation;
use crate::version::SchemaVersion;

/// Maps a Rust member type to the schema type it can hold
pub trait HostField {
    fn field_type() -> FieldType;

    /// Whether the member tolerates the field being absent
    fn is_optional() -> bool {
        false
    }
}

macro_rules! host_field {
    ($ty:expr => $($t:ty),+) => {
        $(impl HostField for $t {
            fn field_type() -> FieldType {
                $ty
            }
        })+
    };
}

host_field!(FieldType::String => String);
host_field!(FieldType::Boolean => bool);
host_field!(FieldType::Integer => i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);
host_field!(FieldType::Number => f32, f64);
host_field!(FieldType::Any => Value);

impl<T: HostField> HostField for Option<T> {
    fn field_type() -> FieldType {
        T::field_type()
    }

    fn is_optional() -> bool {
        true
    }
}

impl<T: HostField> HostField for Vec<T> {
    fn field_type() -> FieldType {
        FieldType::Array(Box::new(T::field_type()))
    }
}

// A map's member names are only known at runtime, so it binds to any schema
// type. Member values are checked by serde when an instance is decoded.
impl<T: HostField> HostField for HashMap<String, T> {
    fn field_type() -> FieldType {
        FieldType::Any
    }
}

impl<T: HostField> HostField for BTreeMap<String, T> {
    fn field_type() -> FieldType {
        FieldType::Any
    }
}

/// The member table of a host type
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    name: String,
    shape: ObjectShape,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: ObjectShape::default(),
        }
    }

    /// Add a member whose type implements [`HostField`]
    pub fn member<F: HostField>(self, name: &str) -> Self {
        self.member_of_type(name, F::field_type(), F::is_optional())
    }

    /// Add a member with an explicit schema type
    pub fn member_of_type(mut self, name: &str, ty: FieldType, optional: bool) -> Self {
        let def = if optional {
            FieldDef::optional(name, ty)
        } else {
            FieldDef::required(name, ty)
        };
        self.shape.upsert_at(name, def);
        self
    }

    /// Add a member that is itself a host type
    pub fn nested<T: HostType>(self, name: &str) -> Self {
        self.member_of_type(name, FieldType::Object(T::descriptor().shape), false)
    }

    pub fn optional_nested<T: HostType>(self, name: &str) -> Self {
        self.member_of_type(name, FieldType::Object(T::descriptor().shape), true)
    }

    /// Add a list of host types
    pub fn nested_list<T: HostType>(self, name: &str) -> Self {
        let items = FieldType::Object(T::descriptor().shape);
        self.member_of_type(name, FieldType::Array(Box::new(items)), false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &ObjectShape {
        &self.shape
    }
}

/// A Rust type that can be bound to a lineage's primary schema
pub trait HostType: Serialize + DeserializeOwned {
    fn descriptor() -> TypeDescriptor;
}

/// A checked pairing of a schema version and a host type descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct TypeBinding {
    version: SchemaVersion,
    descriptor: TypeDescriptor,
}

impl TypeBinding {
    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }
}

/// Checks structural assignability of host types to schemas
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeBinder;

impl TypeBinder {
    pub fn new() -> Self {
        Self
    }

    /// Bind the lineage's primary schema to `T`
    pub fn bind<T: HostType>(&self, lineage: Arc<Lineage>) -> Result<ConvergentLineage<T>> {
        let binding = self.check(lineage.primary_schema(), T::descriptor())?;
        info!(
            lineage = %lineage.name(),
            version = %binding.version,
            host = %binding.descriptor.name,
            "bound primary schema"
        );
        Ok(ConvergentLineage {
            lineage,
            binding,
            _host: PhantomData,
        })
    }

    /// Check a descriptor against one schema version
    ///
    /// Fails with the first mismatch found scanning the schema's fields in
    /// declaration order.
    pub fn check(&self, schema: &SchemaNode, descriptor: TypeDescriptor) -> Result<TypeBinding> {
        let effective = effective_shape(schema);
        check_object(&effective, &descriptor.shape, "").map_err(|mismatch| {
            debug!(
                host = %descriptor.name,
                version = %schema.version(),
                %mismatch,
                "not assignable"
            );
            LineageError::NotAssignable {
                type_name: descriptor.name.clone(),
                field: mismatch.field,
                reason: mismatch.reason,
            }
        })?;
        Ok(TypeBinding {
            version: schema.version(),
            descriptor,
        })
    }
}

/// The schema's shape narrowed by its `required` and `subtype_of` invariants
fn effective_shape(schema: &SchemaNode) -> ObjectShape {
    let mut shape = schema.shape().clone();
    for invariant in schema.invariants() {
        match invariant {
            Invariant::Required { field } => {
                if let Some(def) = shape.field_at_mut(field) {
                    def.required = true;
                }
            }
            Invariant::SubtypeOf { field, ty } => {
                if let Some(def) = shape.field_at_mut(field) {
                    if ty.is_subtype_of(&def.ty) {
                        def.ty = ty.clone();
                    }
                }
            }
            _ => {}
        }
    }
    shape
}

fn check_object(
    schema: &ObjectShape,
    host: &ObjectShape,
    prefix: &str,
) -> std::result::Result<(), ShapeMismatch> {
    for field in &schema.fields {
        let path = join_path(prefix, &field.name);
        let member = match host.field(&field.name) {
            Some(member) => member,
            None if field.required => {
                return Err(ShapeMismatch {
                    field: path,
                    reason: "is required by the schema but the host type has no such member"
                        .to_string(),
                })
            }
            None => continue,
        };

        if !field.required && member.required {
            return Err(ShapeMismatch {
                field: path,
                reason: "is optional in the schema but required on the host type".to_string(),
            });
        }

        check_type(&field.ty, &member.ty, &path)?;
    }
    Ok(())
}

fn check_type(
    schema: &FieldType,
    host: &FieldType,
    path: &str,
) -> std::result::Result<(), ShapeMismatch> {
    match (schema, host) {
        (_, FieldType::Any) => Ok(()),
        (FieldType::Object(s), FieldType::Object(h)) => check_object(s, h, path),
        (FieldType::Array(s), FieldType::Array(h)) => check_type(s, h, &format!("{path}[]")),
        (s, h) if s.is_subtype_of(h) => Ok(()),
        (s, h) => Err(ShapeMismatch {
            field: path.to_string(),
            reason: format!("has schema type {s} but the host member holds {h}"),
        }),
    }
}

/// A lineage whose primary schema is bound to the host type `T`
///
/// Immutable and cheap to clone; safe to share across threads.
pub struct ConvergentLineage<T> {
    lineage: Arc<Lineage>,
    binding: TypeBinding,
    _host: PhantomData<fn() -> T>,
}

impl<T> Clone for ConvergentLineage<T> {
    fn clone(&self) -> Self {
        Self {
            lineage: Arc::clone(&self.lineage),
            binding: self.binding.clone(),
            _host: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for ConvergentLineage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvergentLineage")
            .field("lineage", &self.lineage.name())
            .field("binding", &self.binding)
            .finish()
    }
}

impl<T: HostType> ConvergentLineage<T> {
    pub fn lineage(&self) -> &Lineage {
        &self.lineage
    }

    pub fn shared_lineage(&self) -> Arc<Lineage> {
        Arc::clone(&self.lineage)
    }

    pub fn binding(&self) -> &TypeBinding {
        &self.binding
    }

    pub fn primary_version(&self) -> SchemaVersion {
        self.binding.version
    }

    pub fn primary_schema(&self) -> &SchemaNode {
        self.lineage.primary_schema()
    }

    pub fn translate(
        &self,
        instance: &Value,
        from: SchemaVersion,
        to: SchemaVersion,
    ) -> Result<Translation> {
        self.lineage.translate(instance, from, to)
    }

    pub fn validate(&self, instance: &Value, version: SchemaVersion) -> Result<()> {
        self.lineage.validate(instance, version)
    }

    /// Translate an instance of any version to the primary version and decode it
    pub fn decode(&self, instance: &Value, from: SchemaVersion) -> Result<T> {
        let primary = self.primary_version();
        let translated = self.lineage.translate(instance, from, primary)?.into_instance();
        self.lineage.validate(&translated, primary)?;
        Ok(serde_json::from_value(translated)?)
    }

    /// Encode a host value and translate it to the requested version
    pub fn encode(&self, value: &T, to: SchemaVersion) -> Result<Value> {
        let instance = serde_json::to_value(value)?;
        Ok(self.lineage.translate(&instance, self.primary_version(), to)?.into_instance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens::{Lens, LensOp, Lossiness};
    use crate::lineage::LineageBuilder;
    use crate::version::sv;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Named {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    }

    impl HostType for Named {
        fn descriptor() -> TypeDescriptor {
            TypeDescriptor::new("Named")
                .member::<String>("name")
                .member::<Option<String>>("note")
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Nameless {
        title: String,
    }

    impl HostType for Nameless {
        fn descriptor() -> TypeDescriptor {
            TypeDescriptor::new("Nameless").member::<String>("title")
        }
    }

    fn lineage() -> Arc<Lineage> {
        let v0 = ObjectShape::from_json(&json!({
            "properties": { "name": { "type": "string" }, "note": { "type": "string" } },
            "required": ["name"]
        }))
        .unwrap();
        let v1 = ObjectShape::from_json(&json!({
            "properties": {
                "name": { "type": "string" },
                "note": { "type": "string" },
                "type": { "type": "string" }
            },
            "required": ["name", "type"]
        }))
        .unwrap();
        Arc::new(
            LineageBuilder::new("named")
                .schema(sv(0, 0), v0)
                .schema(sv(0, 1), v1)
                .lens(Lens::from_ops(
                    sv(0, 0),
                    sv(0, 1),
                    vec![LensOp::AddField { field: "type".into(), default: json!("unknown") }],
                    vec![LensOp::RemoveField { field: "type".into() }],
                    Lossiness::LOSSY_REVERSE,
                ))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_bind_and_decode() {
        let bound = TypeBinder::new().bind::<Named>(lineage()).unwrap();
        assert_eq!(bound.primary_version(), sv(0, 0));

        let decoded = bound.decode(&json!({ "name": "x", "type": "custom" }), sv(0, 1)).unwrap();
        assert_eq!(decoded, Named { name: "x".into(), note: None });
    }

    #[test]
    fn test_encode_to_newer_version() {
        let bound = TypeBinder::new().bind::<Named>(lineage()).unwrap();
        let raw = bound.encode(&Named { name: "x".into(), note: None }, sv(0, 1)).unwrap();
        assert_eq!(raw, json!({ "name": "x", "type": "unknown" }));
    }

    #[test]
    fn test_missing_member_names_field() {
        let lineage = lineage();
        let err = TypeBinder::new().bind::<Nameless>(Arc::clone(&lineage)).unwrap_err();
        match err {
            LineageError::NotAssignable { type_name, field, .. } => {
                assert_eq!(type_name, "Nameless");
                assert_eq!(field, "name");
            }
            other => panic!("expected NotAssignable, got {other:?}"),
        }
        // The lineage is untouched and still usable
        assert!(TypeBinder::new().bind::<Named>(lineage).is_ok());
    }

    #[test]
    fn test_type_and_optionality_mismatches() {
        let node = lineage();
        let node = node.primary_schema();

        let wrong_type = TypeDescriptor::new("Wrong").member::<i64>("name");
        let err = TypeBinder::new().check(node, wrong_type).unwrap_err();
        assert!(matches!(err, LineageError::NotAssignable { ref field, .. } if field == "name"));

        let strict_note = TypeDescriptor::new("Strict")
            .member::<String>("name")
            .member::<String>("note");
        let err = TypeBinder::new().check(node, strict_note).unwrap_err();
        assert!(matches!(err, LineageError::NotAssignable { ref field, .. } if field == "note"));
    }

    #[test]
    fn test_extra_host_members_are_ignored() {
        let node = lineage();
        let descriptor = TypeDescriptor::new("Wide")
            .member::<String>("name")
            .member::<u32>("extra")
            .member::<Option<Value>>("note");
        assert!(TypeBinder::new().check(node.primary_schema(), descriptor).is_ok());
    }

    #[test]
    fn test_integer_schema_fits_float_member_but_not_reverse() {
        let int_shape = ObjectShape::new(vec![FieldDef::required("n", FieldType::Integer)]);
        let num_shape = ObjectShape::new(vec![FieldDef::required("n", FieldType::Number)]);
        let ints = LineageBuilder::new("ints").schema(sv(0, 0), int_shape).build().unwrap();
        let nums = LineageBuilder::new("nums").schema(sv(0, 0), num_shape).build().unwrap();

        let float_host = TypeDescriptor::new("F").member::<f64>("n");
        let int_host = TypeDescriptor::new("I").member::<i64>("n");
        assert!(TypeBinder::new().check(ints.primary_schema(), float_host).is_ok());
        assert!(TypeBinder::new().check(nums.primary_schema(), int_host).is_err());
    }

    #[test]
    fn test_required_invariant_tightens_binding() {
        let shape = ObjectShape::new(vec![FieldDef::optional("note", FieldType::String)]);
        let lineage = LineageBuilder::new("tight")
            .schema_with_invariants(
                sv(0, 0),
                shape,
                vec![Invariant::Required { field: "note".into() }],
            )
            .build()
            .unwrap();

        // The invariant makes an optional schema field required, so a required member fits
        let descriptor = TypeDescriptor::new("Note").member::<String>("note");
        assert!(TypeBinder::new().check(lineage.primary_schema(), descriptor).is_ok());
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Info {
        version: i64,
    }

    impl HostType for Info {
        fn descriptor() -> TypeDescriptor {
            TypeDescriptor::new("Info").member::<i64>("version")
        }
    }

    #[test]
    fn test_nested_mismatch_names_full_path() {
        let shape = ObjectShape::from_json(&json!({
            "properties": {
                "info": {
                    "properties": { "version": { "type": "string" } },
                    "required": ["version"]
                }
            }
        }))
        .unwrap();
        let lineage = LineageBuilder::new("nested").schema(sv(0, 0), shape).build().unwrap();

        let descriptor = TypeDescriptor::new("Outer").optional_nested::<Info>("info");
        let err = TypeBinder::new().check(lineage.primary_schema(), descriptor).unwrap_err();
        assert!(
            matches!(err, LineageError::NotAssignable { ref field, .. } if field == "info.version")
        );

        let required = TypeDescriptor::new("Outer").nested::<Info>("info");
        let err = TypeBinder::new().check(lineage.primary_schema(), required).unwrap_err();
        assert!(matches!(err, LineageError::NotAssignable { ref field, .. } if field == "info"));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Labelled {
        name: String,
        labels: BTreeMap<String, String>,
    }

    impl HostType for Labelled {
        fn descriptor() -> TypeDescriptor {
            TypeDescriptor::new("Labelled")
                .member::<String>("name")
                .member::<BTreeMap<String, String>>("labels")
        }
    }

    #[test]
    fn test_map_members_bind_to_object_fields() {
        assert_eq!(<HashMap<String, i64>>::field_type(), FieldType::Any);
        assert!(<Option<HashMap<String, i64>>>::is_optional());
        assert!(!<BTreeMap<String, String>>::is_optional());

        let shape = ObjectShape::from_json(&json!({
            "properties": {
                "name": { "type": "string" },
                "labels": { "properties": { "team": { "type": "string" } } }
            },
            "required": ["name", "labels"]
        }))
        .unwrap();
        let lineage =
            Arc::new(LineageBuilder::new("labelled").schema(sv(0, 0), shape).build().unwrap());
        let bound = TypeBinder::new().bind::<Labelled>(lineage).unwrap();

        let decoded = bound
            .decode(&json!({ "name": "x", "labels": { "team": "ops", "tier": "1" } }), sv(0, 0))
            .unwrap();
        assert_eq!(decoded.labels.get("team").map(String::as_str), Some("ops"));
        assert_eq!(decoded.labels.len(), 2);

        // Schema accepts a numeric extra member, the map's value type does not.
        let err = bound.decode(&json!({ "name": "x", "labels": { "tier": 1 } }), sv(0, 0));
        assert!(err.is_err());
    }

    #[test]
    fn test_convergent_lineage_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ConvergentLineage<Named>>();
    }
}
