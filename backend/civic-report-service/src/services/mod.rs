pub mod assignment;
pub mod evidence;
pub mod geo_index;
pub mod identity;
pub mod ledger;
pub mod lifecycle;
pub mod notifications;
pub mod relay;

pub use assignment::AssignmentRegistry;
pub use evidence::{EvidenceStore, LocalEvidenceStore, MemoryEvidenceStore};
pub use geo_index::{distance_meters, Geofence, EARTH_RADIUS_METERS};
pub use identity::{GatewayHeaders, IdentityProvider, StaticIdentity};
pub use ledger::CoinLedger;
pub use lifecycle::{LifecyclePolicy, PhotoUpload, ReportLifecycle};
pub use notifications::{NotificationDispatcher, NotificationInbox};
pub use relay::{NotificationRelay, RelaySettings};
