//! The response envelope and generic field lookup.
//!
//! Every successful result is a [`Response<T>`]: the modeled payload plus optional HTTP
//! and service metadata. Payload types expose their members by name through
//! [`ModeledFields`], which lets tooling read fields without knowing the concrete type.

use crate::metadata::{HttpMetadata, ResponseMetadata};
use crate::{Error, Result};
use std::any::Any;

/// Named access to the members of a modeled type.
///
/// The default implementation models no fields, so every lookup is absent. Concrete
/// types list their members, usually through [`modeled_fields!`](crate::modeled_fields).
/// A member that is itself a modeled type can be looked up again, recursively.
///
/// # Examples
///
/// ```
/// use callcore::{modeled_fields, ModeledFields};
///
/// #[derive(Clone)]
/// struct Owner { name: String }
/// modeled_fields!(Owner { "Name" => name });
///
/// #[derive(Clone)]
/// struct Bucket { name: String, owner: Owner, size: u64 }
/// modeled_fields!(Bucket { "Name" => name, "Owner" => owner, "Size" => size });
///
/// let bucket = Bucket {
///     name: "logs".into(),
///     owner: Owner { name: "ops".into() },
///     size: 42,
/// };
///
/// let owner: Owner = bucket.get_value_for_field("Owner").unwrap().unwrap();
/// let owner_name: Option<String> = owner.get_value_for_field("Name").unwrap();
/// assert_eq!(owner_name.as_deref(), Some("ops"));
///
/// assert!(bucket.get_value_for_field::<u64>("Missing").unwrap().is_none());
/// assert!(bucket.get_value_for_field::<String>("Size").is_err());
/// ```
pub trait ModeledFields {
    /// Returns the member named `name`, or `None` if this type does not model it.
    fn field(&self, _name: &str) -> Option<&dyn Any> {
        None
    }

    /// Returns a copy of the member named `name` as a `V`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldType`] if the member exists but is not a `V`.
    fn get_value_for_field<V>(&self, name: &str) -> Result<Option<V>>
    where
        V: Any + Clone,
        Self: Sized,
    {
        let Some(value) = self.field(name) else {
            return Ok(None);
        };
        value
            .downcast_ref::<V>()
            .cloned()
            .map(Some)
            .ok_or_else(|| Error::FieldType {
                field: name.to_owned(),
                expected: std::any::type_name::<V>(),
            })
    }
}

impl ModeledFields for () {}

/// Generates a [`ModeledFields`] implementation from a name→member table.
///
/// Each entry maps the member's modeled name to a struct field. Lookups return the
/// field with its declared type, so an `Option<String>` member is read as
/// `Option<String>`.
#[macro_export]
macro_rules! modeled_fields {
    ($ty:ty { $($name:literal => $member:ident),* $(,)? }) => {
        impl $crate::ModeledFields for $ty {
            fn field(&self, name: &str) -> ::std::option::Option<&dyn ::std::any::Any> {
                match name {
                    $($name => ::std::option::Option::Some(&self.$member as &dyn ::std::any::Any),)*
                    _ => ::std::option::Option::None,
                }
            }
        }
    };
}

/// A successful response: the modeled payload and the metadata of the exchange.
///
/// Envelopes are immutable. To derive a modified copy, go through
/// [`to_builder`](Response::to_builder).
///
/// # Examples
///
/// ```
/// use callcore::metadata::ResponseMetadata;
/// use callcore::Response;
///
/// let response = Response::builder(7u32)
///     .response_metadata(ResponseMetadata::new().with_request_id("req-7"))
///     .build();
///
/// assert_eq!(*response, 7);
/// assert_eq!(response.request_id(), Some("req-7"));
/// assert_eq!(response.to_builder().build(), response);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    data: T,
    http_metadata: Option<HttpMetadata>,
    response_metadata: Option<ResponseMetadata>,
}

impl<T> Response<T> {
    /// Starts building an envelope around `data` with no metadata.
    pub fn builder(data: T) -> ResponseBuilder<T> {
        ResponseBuilder {
            data,
            http_metadata: None,
            response_metadata: None,
        }
    }

    /// Returns a builder seeded with a copy of this envelope.
    pub fn to_builder(&self) -> ResponseBuilder<T>
    where
        T: Clone,
    {
        self.clone().into_builder()
    }

    /// Returns a builder seeded with this envelope.
    pub fn into_builder(self) -> ResponseBuilder<T> {
        ResponseBuilder {
            data: self.data,
            http_metadata: self.http_metadata,
            response_metadata: self.response_metadata,
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// The HTTP layer of the exchange, if it was recorded.
    pub fn http_metadata(&self) -> Option<&HttpMetadata> {
        self.http_metadata.as_ref()
    }

    /// Service-assigned metadata, if it was recorded.
    pub fn response_metadata(&self) -> Option<&ResponseMetadata> {
        self.response_metadata.as_ref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.response_metadata.as_ref()?.request_id()
    }

    /// Returns a response header by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.http_metadata.as_ref()?.header(name)
    }

    /// Maps the payload while keeping the metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            http_metadata: self.http_metadata,
            response_metadata: self.response_metadata,
        }
    }
}

impl<T: ModeledFields> ModeledFields for Response<T> {
    fn field(&self, name: &str) -> Option<&dyn Any> {
        self.data.field(name)
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// Builder for [`Response`].
#[derive(Debug, Clone)]
pub struct ResponseBuilder<T> {
    data: T,
    http_metadata: Option<HttpMetadata>,
    response_metadata: Option<ResponseMetadata>,
}

impl<T> ResponseBuilder<T> {
    pub fn http_metadata(mut self, metadata: HttpMetadata) -> Self {
        self.http_metadata = Some(metadata);
        self
    }

    pub fn response_metadata(mut self, metadata: ResponseMetadata) -> Self {
        self.response_metadata = Some(metadata);
        self
    }

    /// The HTTP metadata set so far.
    pub fn current_http_metadata(&self) -> Option<&HttpMetadata> {
        self.http_metadata.as_ref()
    }

    /// The response metadata set so far.
    pub fn current_response_metadata(&self) -> Option<&ResponseMetadata> {
        self.response_metadata.as_ref()
    }

    pub fn build(self) -> Response<T> {
        Response {
            data: self.data,
            http_metadata: self.http_metadata,
            response_metadata: self.response_metadata,
        }
    }
}
