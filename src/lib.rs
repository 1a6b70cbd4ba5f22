//! koboldrs Library
//!
//! Client for a locally hosted KoboldCpp text-generation server, with
//! flat-file storage for character personas.

pub mod kobold;
pub mod session;
pub mod storage;
pub mod types;

pub use kobold::{KoboldClient, KoboldError};
pub use session::Session;
pub use storage::{CharacterStore, StorageError};
pub use types::character::Character;
