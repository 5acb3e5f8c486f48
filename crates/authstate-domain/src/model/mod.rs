//! Principal model: names, privileges, built-in roles and stored document layouts.

mod builtin;
mod document;
mod names;
mod privilege;

pub use builtin::{builtin_role, is_builtin_role};
pub use document::*;
pub use names::{PrincipalName, RawDocument, RoleName, UserName};
pub use privilege::{ActionType, ParsedPrivilege, Privilege, PrivilegeSet, ResourcePattern};
