pub mod autograd_attention;
pub mod cpu;
pub mod impl_generic;
pub mod traits;
pub mod validate;

pub use autograd_attention::{var_flash_attention, var_flash_attention_with_tiles};
pub use traits::AttentionOps;
pub use traits::FlashAttentionOps;
pub use validate::AttentionShape;
