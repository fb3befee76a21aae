mod error;
mod paths;
mod schema;
mod store;

pub use error::PrefsStoreError;
pub use paths::{prefs_file, prefs_root};
pub use schema::PrefsRecord;
pub use store::PrefsStore;
