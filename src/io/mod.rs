pub mod buckets;
pub mod curves;
pub mod events;
pub mod tsv;
