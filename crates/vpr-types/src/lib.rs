//! Small shared value types for the VPR envelope workspace.
//!
//! - [`NonEmptyText`]: trimmed, guaranteed non-empty strings used for identifiers and roles.
//! - [`ContentType`]: the payload-kind registry used when negotiating envelope and attachment
//!   content types.

mod content_type;
mod text;

pub use content_type::{ContentType, ContentTypeError};
pub use text::{NonEmptyText, TextError};
