//! Metadata store and domain services.
//!
//! Sandbox, organization, user, image and API key records live in a SQLite
//! database. The modules here pair thin repositories over the pool with the
//! business rules that sit above the lifecycle engine: sandbox provisioning
//! with rollback, API key validation, and the background health reconciler.

mod apikeys;
mod db;
mod health;
mod images;
mod models;
mod orgs;
mod sandboxes;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use apikeys::*;
pub use db::*;
pub use health::*;
pub use images::*;
pub use models::*;
pub use orgs::*;
pub use sandboxes::*;
