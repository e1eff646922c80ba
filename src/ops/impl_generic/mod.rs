pub mod attention;

pub use attention::{causal_mask, multi_head_attention_impl, scaled_dot_product_attention_impl};
