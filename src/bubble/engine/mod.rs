pub mod detect;
pub mod geom;
pub mod layout;
pub mod merge;
pub mod preprocess;
pub mod text;
