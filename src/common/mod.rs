pub mod cursor;
pub mod helpers;
pub mod rows;
pub mod schema;
