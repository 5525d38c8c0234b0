pub mod cpu;
pub mod traits;

pub use traits::AttentionOps;
pub use traits::FlashAttentionOps;
