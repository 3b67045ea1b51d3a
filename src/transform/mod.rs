pub mod product;
pub mod taxonomy;
