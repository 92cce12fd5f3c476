//! # Storage Module
//!
//! Local persistence for the device key pair.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Startup                                                               │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  KeyStore::load_or_generate(user_id, bits)                             │
//! │     │                                                                   │
//! │     ├── record present & consistent ──► use it                        │
//! │     ├── record missing              ──► generate, save                 │
//! │     └── record corrupt              ──► warn, generate, save           │
//! │                                                                         │
//! │  Only the private key is stored. Messages are never persisted.         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod key_store;

pub use key_store::{validate_user_id, KeyStore};
