use std::io;
use std::path::Path;

use dashmap::DashMap;
use serde::Deserialize;
use ulid::Ulid;

use crate::model::{Price, ServiceOffering};

/// Read-only view of the catalog service. Authoritative for offering
/// duration and price.
pub trait OfferingCatalog: Send + Sync {
    fn offering(&self, id: &Ulid) -> Option<ServiceOffering>;

    /// Extra charge for a catalog design attached to a booking.
    fn design_surcharge(&self, id: &Ulid) -> Option<Price>;
}

#[derive(Debug, Deserialize)]
struct DesignEntry {
    id: Ulid,
    #[serde(default)]
    surcharge: Price,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    offerings: Vec<ServiceOffering>,
    #[serde(default)]
    designs: Vec<DesignEntry>,
}

/// In-process catalog snapshot.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    offerings: DashMap<Ulid, ServiceOffering>,
    designs: DashMap<Ulid, Price>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{ "offerings": [...], "designs": [...] }` from a JSON file.
    pub fn from_json_file(path: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    pub fn from_json(bytes: &[u8]) -> io::Result<Self> {
        let file: CatalogFile = serde_json::from_slice(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let catalog = Self::new();
        for offering in file.offerings {
            catalog.insert_offering(offering);
        }
        for design in file.designs {
            catalog.insert_design(design.id, design.surcharge);
        }
        Ok(catalog)
    }

    pub fn insert_offering(&self, offering: ServiceOffering) {
        self.offerings.insert(offering.id, offering);
    }

    pub fn insert_design(&self, id: Ulid, surcharge: Price) {
        self.designs.insert(id, surcharge);
    }

    pub fn offering_count(&self) -> usize {
        self.offerings.len()
    }
}

impl OfferingCatalog for MemoryCatalog {
    fn offering(&self, id: &Ulid) -> Option<ServiceOffering> {
        self.offerings.get(id).map(|e| e.value().clone())
    }

    fn design_surcharge(&self, id: &Ulid) -> Option<Price> {
        self.designs.get(id).map(|e| *e.value())
    }
}
