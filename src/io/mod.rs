pub mod bucket;
pub mod index_file;
