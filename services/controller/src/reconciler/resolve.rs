//! Reference resolution.
//!
//! An identity field can be given three ways, checked in order: the raw
//! value, a `*Ref` naming a record, or a `*Selector` matching record labels.
//! The raw value wins and is never re-resolved, so once a reference has
//! resolved the result is cached on the record as the raw value.
//! A referenced Device must be `active` before it resolves.

use metal_api::{DataKeySelector, DeviceState, DynamicObject, Kind, ObjectKey, Reference, Selector};
use tracing::debug;

use crate::error::ReconcileError;
use crate::secrets::DataSource;
use crate::store::ObjectStore;

/// The three forms of one identity field, borrowed from the parameters.
pub struct ReferenceField<'a> {
    /// Wire name of the raw field, e.g. `deviceId`.
    pub field: &'static str,
    pub value: &'a mut Option<String>,
    pub reference: &'a mut Option<Reference>,
    pub selector: Option<&'a Selector>,
}

/// Resolve `field` against records of `kind` and return the target's
/// external name. On success the raw value is set; a selector match is also
/// recorded as a reference.
pub async fn resolve_reference(
    store: &dyn ObjectStore,
    kind: Kind,
    field: ReferenceField<'_>,
) -> Result<String, ReconcileError> {
    let ReferenceField {
        field,
        value,
        reference,
        selector,
    } = field;

    if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
        return Ok(v.to_string());
    }

    if let Some(r) = reference.as_ref() {
        let target = store.get(&ObjectKey::new(kind, &r.name)).await?;
        let Some(target) = target else {
            return Err(ReconcileError::reference_not_ready(
                field,
                format!("{kind} {} does not exist", r.name),
            ));
        };
        let external = ready_external_name(field, &target)?;
        debug!(field, target = %r.name, external_name = %external, "resolved reference");
        *value = Some(external.clone());
        return Ok(external);
    }

    if let Some(selector) = selector {
        let matches = store.list(kind, Some(selector)).await?;
        return match matches.as_slice() {
            [] => Err(ReconcileError::reference_not_ready(
                field,
                format!("no {kind} matches selector {:?}", selector.match_labels),
            )),
            [target] => {
                let external = ready_external_name(field, target)?;
                debug!(
                    field,
                    target = %target.metadata.name,
                    external_name = %external,
                    "resolved selector"
                );
                *reference = Some(Reference::new(&target.metadata.name));
                *value = Some(external.clone());
                Ok(external)
            }
            many => Err(ReconcileError::ReferenceAmbiguous {
                field,
                matches: many.len(),
            }),
        };
    }

    Err(ReconcileError::InvalidSpec(format!(
        "one of {field}, {field}Ref or {field}Selector is required"
    )))
}

/// The target's external name, once it exists and the target can be used.
/// A Device is usable only when `active`.
fn ready_external_name(
    field: &'static str,
    target: &DynamicObject,
) -> Result<String, ReconcileError> {
    let kind = target.kind;
    let name = &target.metadata.name;
    let external = external_name(&target.spec).ok_or_else(|| {
        ReconcileError::reference_not_ready(
            field,
            format!("{kind} {name} has no external name yet"),
        )
    })?;

    if kind == Kind::Device {
        let state = target
            .status
            .pointer("/atProvider/state")
            .and_then(serde_json::Value::as_str)
            .map(DeviceState::parse);
        if state != Some(DeviceState::Active) {
            let state = state.as_ref().map_or("unknown", DeviceState::as_str);
            return Err(ReconcileError::reference_not_ready(
                field,
                format!("{kind} {name} is not active yet ({state})"),
            ));
        }
    }
    Ok(external)
}

fn external_name(spec: &serde_json::Value) -> Option<String> {
    spec.get("externalName")
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Read a ConfigMap/Secret key. A missing document or key is
/// `ReferenceNotReady` unless the selector is optional.
pub async fn resolve_data_key(
    data: &dyn DataSource,
    field: &'static str,
    selector: &DataKeySelector,
) -> Result<Option<String>, ReconcileError> {
    let key = selector.key_or_default();
    let document = data
        .read(selector.kind, &selector.namespace, &selector.name)
        .await
        .map_err(|e| ReconcileError::reference_not_ready(field, e.to_string()))?;

    match document.as_ref().and_then(|doc| doc.get(key)) {
        Some(v) => Ok(Some(v.clone())),
        None if selector.optional => Ok(None),
        None => Err(ReconcileError::reference_not_ready(
            field,
            format!(
                "key {key:?} not found in {:?} {}/{}",
                selector.kind, selector.namespace, selector.name
            ),
        )),
    }
}
