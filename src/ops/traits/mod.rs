pub mod attention;

pub use attention::{AttentionOps, FlashAttentionOps};
