/// Driver capability trait, type enum and mount point helpers.
pub mod driver;
/// External tool runner with stdin secrets and timeouts.
pub mod exec;
/// `gocryptfs` directory containers.
pub mod gocryptfs;
/// Mount status lookups.
pub mod mount_table;
/// Ordered driver registry and type detection.
pub mod registry;
/// `veracrypt` file containers.
pub mod veracrypt;

pub use driver::{CreateOptions, VolumeDriver, VolumeType};
pub use gocryptfs::GocryptfsDriver;
pub use mount_table::{MountTable, SystemMountTable};
pub use registry::TypeRegistry;
pub use veracrypt::VeracryptDriver;
