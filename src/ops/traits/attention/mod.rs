pub mod flash;

pub use flash::{AttentionOps, FlashAttentionOps};
