//! Server/group directory: incremental parsing and registry reconciliation.

mod parser;
mod reconcile;

pub use parser::{
    decode_entities, reduce_common_name, DirectoryBatch, DirectoryGroup, DirectoryParser,
    DirectoryServer,
};
pub use reconcile::reconcile;
