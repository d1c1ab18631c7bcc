use std::path::Path;

use crate::{
    error::{CryptainerError, Result},
    volume::{GocryptfsDriver, VeracryptDriver, VolumeDriver, VolumeType},
};

/// Ordered set of drivers. Registration order is detection priority.
pub struct TypeRegistry {
    drivers: Vec<Box<dyn VolumeDriver>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    /// Registry with the system `gocryptfs` and `veracrypt` drivers.
    pub fn with_default_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(GocryptfsDriver::new()));
        registry.register(Box::new(VeracryptDriver::new()));
        registry
    }

    /// Adds a driver at the lowest priority, or replaces the driver already
    /// registered for the same type while keeping its position.
    pub fn register(&mut self, driver: Box<dyn VolumeDriver>) {
        let kind = driver.volume_type();
        match self
            .drivers
            .iter()
            .position(|existing| existing.volume_type() == kind)
        {
            Some(index) => self.drivers[index] = driver,
            None => self.drivers.push(driver),
        }
    }

    /// First driver, in priority order, whose detection accepts `path`.
    pub fn resolve_by_path(&self, path: &Path) -> Option<&dyn VolumeDriver> {
        self.drivers
            .iter()
            .find(|driver| driver.detect(path))
            .map(|driver| driver.as_ref())
    }

    /// Driver for an exact, case-sensitive type identifier.
    pub fn resolve_by_name(&self, type_name: &str) -> Result<&dyn VolumeDriver> {
        VolumeType::from_id(type_name)
            .and_then(|kind| self.find(kind))
            .ok_or_else(|| CryptainerError::UnknownType(type_name.to_owned()))
    }

    /// Driver for a known type.
    pub fn driver(&self, kind: VolumeType) -> Result<&dyn VolumeDriver> {
        self.find(kind)
            .ok_or_else(|| CryptainerError::UnknownType(kind.id().to_owned()))
    }

    /// Registered types in priority order.
    pub fn types(&self) -> Vec<VolumeType> {
        self.drivers.iter().map(|driver| driver.volume_type()).collect()
    }

    fn find(&self, kind: VolumeType) -> Option<&dyn VolumeDriver> {
        self.drivers
            .iter()
            .find(|driver| driver.volume_type() == kind)
            .map(|driver| driver.as_ref())
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_default_drivers()
    }
}
