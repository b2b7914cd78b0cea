
pub mod app;
pub mod fast_export;
pub mod line_buffer;
pub mod pool;
pub mod quote;
pub mod repo_tree;
pub mod sliding_window;
pub mod string_pool;
pub mod svndiff;
pub mod svndump;
pub mod treap;
pub mod util;

pub use svndump::SvnDump;
