pub mod flash;
mod standard;

pub use flash::flash_attention_host;
