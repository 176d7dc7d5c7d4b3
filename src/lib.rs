//! Scheduled backups of PostgreSQL databases and file trees onto local
//! directories, mounted SMB shares and S3-compatible object storage.

pub mod audit;
pub mod backup;
pub mod capture;
pub mod config;
pub mod database;
pub mod logging;
pub mod process;
pub mod report;
pub mod schedule;
pub mod storage;
