pub mod db;
pub mod ingest;

pub mod util {
    pub mod env;
}
