//! Client for the Distribuție Oltenia customer portal.
//!
//! The portal has no API. [`api::PortalClient`] logs in through the portal's identity
//! provider like a browser would, finds the token of the metering point in the portal's
//! markup and decodes the meter readings embedded in the history page.

pub mod api;
pub mod model;

pub use api::{Error, PortalClient};
pub use model::{Credentials, Portal, Quantity, Reading, ReadingDate};
