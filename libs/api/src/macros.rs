//! Macros for wiring record kinds to the [`Resource`](crate::Resource) and
//! [`Managed`](crate::Managed) traits.

/// Implement `Resource` and `Managed` for a record type.
///
/// The type must have `metadata: ObjectMeta`, a `spec` with an inlined
/// `resource: ResourceSpec`, and a `status` with an inlined
/// `resource: ResourceStatus`.
///
/// # Example
///
/// ```ignore
/// managed_kind!(Device, Kind::Device);
/// ```
#[macro_export]
macro_rules! managed_kind {
    ($ty:ident, $kind:expr) => {
        impl $crate::Resource for $ty {
            const KIND: $crate::Kind = $kind;

            fn metadata(&self) -> &$crate::ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut $crate::ObjectMeta {
                &mut self.metadata
            }
        }

        impl $crate::Managed for $ty {
            fn resource_spec(&self) -> &$crate::ResourceSpec {
                &self.spec.resource
            }

            fn resource_spec_mut(&mut self) -> &mut $crate::ResourceSpec {
                &mut self.spec.resource
            }

            fn resource_status(&self) -> &$crate::ResourceStatus {
                &self.status.resource
            }

            fn resource_status_mut(&mut self) -> &mut $crate::ResourceStatus {
                &mut self.status.resource
            }
        }
    };
}
