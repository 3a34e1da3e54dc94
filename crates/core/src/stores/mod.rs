pub mod elasticsearch;
pub mod gcs;
pub mod local;

pub use elasticsearch::ElasticsearchStore;
pub use gcs::GcsStore;
pub use local::LocalStore;
