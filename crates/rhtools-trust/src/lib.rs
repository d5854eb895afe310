//! rhtools trust engine
//!
//! Signed trust declarations, delegation containment, and trust resolution
//! for the rhtools ROM-hack catalog.
//!
//! # Model
//!
//! - Keypairs carry a usage class (`master-admin-signing` down to `user`)
//!   that bounds what they may sign and about whom.
//! - A [`TrustDeclaration`] is authored as a draft, finalized (content hash
//!   and validity locked), signed, and optionally published. Signed
//!   declarations are immutable; change happens through updates and
//!   revocations, which are themselves declarations.
//! - A non-root issuer may only grant what it holds itself: permissions,
//!   level, duration caps, scope, and validity are all contained by the
//!   issuer's own resolved standing at issue time.
//! - [`resolver::resolve_trust`] is a pure function of a [`TrustSnapshot`],
//!   a subject, a scope, and an instant.
//!
//! # Layout
//!
//! - Records: [`keypair`], [`declaration`], [`assignment`], [`permissions`],
//!   [`scope`], [`validity`]
//! - Rules: [`authority`], [`countersign`], [`lifecycle`], [`resolver`]
//! - Plumbing: [`canonical`], [`signature`], [`store`], [`persistence`],
//!   [`transport`], [`ingest`], [`cache`], [`events`], [`config`]
//! - [`TrustEngine`] ties them together behind one async facade.

#![forbid(unsafe_code)]

/// Manual trust assignments
pub mod assignment;

/// Authority containment for issuers
pub mod authority;

/// Memoised resolution
pub mod cache;

/// Canonical encoding and content hashes
pub mod canonical;

/// Engine configuration
pub mod config;

/// Countersignature requirements and recording
pub mod countersign;

/// Trust declarations and their wire form
pub mod declaration;

/// Engine facade
pub mod engine;

/// Error types
pub mod error;

/// Change notifications
pub mod events;

/// Validation of discovered declarations
pub mod ingest;

/// Keypairs and the keypair registry
pub mod keypair;

/// Declaration lifecycle transitions
pub mod lifecycle;

/// Permission bits and caps
pub mod permissions;

/// Durable storage of records
pub mod persistence;

/// Trust resolution
pub mod resolver;

/// Scopes and scope containment
pub mod scope;

/// Signing and verification
pub mod signature;

/// Copy-on-write stores and snapshots
pub mod store;

/// Time sources
pub mod time;

/// Publish/discover boundary
pub mod transport;

/// Validity windows
pub mod validity;

pub use assignment::{AssignmentKey, TrustAssignment};
pub use authority::RevocationPolicy;
pub use config::TrustEngineConfig;
pub use countersign::CountersignOutcome;
pub use declaration::{
    DeclarationBody, DeclarationDocument, DeclarationId, DeclarationKind, DeclarationType,
    Subject, TrustDeclaration, TrustLevel, Validity,
};
pub use engine::TrustEngine;
pub use error::{AuthorityCheck, Result, TrustError};
pub use events::TrustEvent;
pub use ingest::IngestReport;
pub use keypair::{Fingerprint, KeyUsage, Keypair, KeypairId};
pub use permissions::{Permission, PermissionSet};
pub use persistence::{JsonDirPersistence, MemoryPersistence, Persistence};
pub use resolver::{Advisory, TrustResult};
pub use scope::{Scope, ScopeRef, ScopeType};
pub use signature::{CancelToken, LocalKeyStore, SignatureCapability, SignatureVerifier};
pub use store::TrustSnapshot;
pub use time::{Clock, ManualClock, SystemClock, TimestampMs};
pub use transport::{LoopbackTransport, PublishAck, Transport};
