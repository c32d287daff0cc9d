//! Service-type dispatch.
//!
//! Storage classes name a service type; only `nfs_treeq` is served by the
//! treeq assembler. Plain `nfs` volumes get a whole filesystem each and are
//! handled elsewhere.

use std::sync::Arc;

use strum::{Display, EnumString};

use crate::api::StorageApi;
use crate::assembler::TreeqAssembler;

/// Volume service type named in a storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ServiceType {
    /// One treeq per volume inside shared filesystems.
    NfsTreeq,
    /// One filesystem per volume.
    Nfs,
}

/// Treeq assembler for `service_type`, or `None` if that service type is
/// not treeq-backed or not recognised.
pub fn treeq_service(service_type: &str, api: Arc<dyn StorageApi>) -> Option<TreeqAssembler> {
    match service_type.parse::<ServiceType>() {
        Ok(ServiceType::NfsTreeq) => Some(TreeqAssembler::new(api)),
        Ok(ServiceType::Nfs) | Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryApi;

    #[test]
    fn test_dispatch() {
        let api: Arc<dyn StorageApi> = Arc::new(MemoryApi::default());
        assert!(treeq_service("nfs_treeq", api.clone()).is_some());
        assert!(treeq_service("nfs", api.clone()).is_none());
        assert!(treeq_service("iscsi", api).is_none());
    }

    #[test]
    fn test_names() {
        assert_eq!(ServiceType::NfsTreeq.to_string(), "nfs_treeq");
        assert_eq!("nfs".parse::<ServiceType>().unwrap(), ServiceType::Nfs);
    }
}
