pub mod rewrite;
pub mod sniff;

pub use rewrite::PlaylistRewriter;
