//! S3-compatible object storage (AWS S3, Cloudflare R2, MinIO).

pub mod s3;

pub use s3::S3ObjectStore;
