// src/protocol/constants.rs
pub const PROTOCOL_VERSION: u32 = 0;

// Exactly the fields of a block on the wire
pub const BLOCK_FIELDS: [&str; 5] = ["precedingBlock", "author", "state", "payload", "signature"];

// Commit-reveal constants
pub const SEED_SIZE: usize = 32;
pub const VALUE_HEX_LEN: usize = 8; // 32-bit value

// Dice constants
pub const DICE_COUNT: usize = 5;
pub const MAX_ATTEMPTS: u8 = 3;
pub const DIE_FACES: u8 = 6;
