// src/core/handler/collaborators.rs
//
// Pluggable external subsystems: batch system submission, file chunk
// I/O, POSIX/NFS ACL manipulation, UFTP transfer setup, and advance
// reservations. Each concern is a trait with a fixed call signature, so
// a real deployment can supply its own implementation without touching
// the dispatcher. The `Unconfigured` stubs keep every tag routable (as
// a clean `TsiError::Handler` failure) even when no collaborator is
// wired in.

use crate::core::connector::Connector;
use crate::core::context::TsiContext;
use crate::core::errors::TsiError;

pub trait BatchSystem: Send + Sync {
    fn submit(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
    fn get_status_listing(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
    fn get_process_listing(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
    fn get_job_details(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
    fn abort_job(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
    fn hold_job(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
    fn resume_job(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
    fn get_budget(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
}

pub trait FileIoHandler: Send + Sync {
    fn get_file_chunk(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
    fn put_file_chunk(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
    fn ls(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
    fn df(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
}

/// Covers both POSIX and NFSv4 ACL manipulation behind one tag
/// (`TSI_FILE_ACL`). Which ACL dialect applies is decided from
/// [`crate::config::Config::acl_policies`], not from the tag.
pub trait AclHandler: Send + Sync {
    fn process_acl(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
}

pub trait UftpHandler: Send + Sync {
    fn uftp(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
}

pub trait ReservationHandler: Send + Sync {
    fn make_reservation(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
    fn query_reservation(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
    fn cancel_reservation(&self, message: &str, connector: &mut dyn Connector, ctx: &TsiContext) -> Result<(), TsiError>;
}

/// Fallback for every collaborator trait when no real implementation is
/// configured: every call fails cleanly rather than panicking or
/// silently no-opping.
pub struct Unconfigured;

fn unconfigured(tag: &str) -> Result<(), TsiError> {
    Err(TsiError::Handler(format!("{tag} is not configured on this TSI instance")))
}

impl BatchSystem for Unconfigured {
    fn submit(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("batch system")
    }
    fn get_status_listing(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("batch system")
    }
    fn get_process_listing(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("batch system")
    }
    fn get_job_details(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("batch system")
    }
    fn abort_job(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("batch system")
    }
    fn hold_job(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("batch system")
    }
    fn resume_job(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("batch system")
    }
    fn get_budget(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("batch system")
    }
}

impl FileIoHandler for Unconfigured {
    fn get_file_chunk(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("file I/O")
    }
    fn put_file_chunk(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("file I/O")
    }
    fn ls(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("file I/O")
    }
    fn df(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("file I/O")
    }
}

impl AclHandler for Unconfigured {
    fn process_acl(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("ACL")
    }
}

impl UftpHandler for Unconfigured {
    fn uftp(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("UFTP")
    }
}

impl ReservationHandler for Unconfigured {
    fn make_reservation(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("reservation")
    }
    fn query_reservation(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("reservation")
    }
    fn cancel_reservation(&self, _: &str, _: &mut dyn Connector, _: &TsiContext) -> Result<(), TsiError> {
        unconfigured("reservation")
    }
}

/// The full set of pluggable collaborators a deployment may wire in.
/// Defaults to [`Unconfigured`] for everything.
pub struct Collaborators {
    pub batch_system: std::sync::Arc<dyn BatchSystem>,
    pub file_io: std::sync::Arc<dyn FileIoHandler>,
    pub acl: std::sync::Arc<dyn AclHandler>,
    pub uftp: std::sync::Arc<dyn UftpHandler>,
    pub reservation: std::sync::Arc<dyn ReservationHandler>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            batch_system: std::sync::Arc::new(Unconfigured),
            file_io: std::sync::Arc::new(Unconfigured),
            acl: std::sync::Arc::new(Unconfigured),
            uftp: std::sync::Arc::new(Unconfigured),
            reservation: std::sync::Arc::new(Unconfigured),
        }
    }
}
