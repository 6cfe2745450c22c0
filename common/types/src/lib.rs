pub mod attachment;
pub mod attribute;
pub mod event;
pub mod exception;
pub mod filter;
pub mod issue;
pub mod launch;
pub mod os;
pub mod validation;

pub use attachment::Attachment;
pub use attribute::Attribute;
pub use event::{Event, EventPayload, SCREEN_ACTIVITY_TYPES, SCREEN_FRAGMENT_TYPES};
pub use exception::{Anr, Exception, IssueSignature};
pub use filter::{AppFilter, AppFilterParams, Direction, FilterError, Keyset};
pub use issue::{IssueGroup, IssueKind};
pub use launch::{LaunchAnomaly, LaunchKind};
pub use os::OsFamily;
pub use validation::ValidationError;
