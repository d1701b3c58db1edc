//! Filesystem artifact store for uploaded media and annotated detection results.
//!
//! Every artifact lives under a single root, partitioned by role (upload vs.
//! result) and by media kind so that naming never collides across namespaces
//! and expiry can sweep each namespace independently.

pub mod errors;
pub mod layout;
pub mod lease;
pub mod record;
pub mod store;

pub use errors::StorageError;
pub use layout::StorageLayout;
pub use lease::{Lease, LeaseTable};
pub use record::{IMAGE_EXTENSIONS, MediaKind, UploadRecord, VIDEO_EXTENSIONS};
pub use store::{ArtifactStore, PurgeScope, StoredArtifact};
