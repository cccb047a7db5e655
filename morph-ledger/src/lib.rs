/*!
Durable per-player ledger of unlocked morph models.

The ledger maps a stable player identity to the set of model identifiers that
player may wear. It is loaded once from a JSON snapshot, mutated through
[`UnlockLedger::unlock`], and rewritten wholesale whenever its contents change.
*/

pub mod error;
pub mod identity;
pub mod ledger;
pub mod snapshot;
pub mod store;

pub use error::{LedgerError, LedgerResult};
pub use identity::{ModelId, PlayerId};
pub use ledger::UnlockLedger;
pub use snapshot::{LedgerSnapshot, SNAPSHOT_VERSION};
pub use store::LedgerStore;
