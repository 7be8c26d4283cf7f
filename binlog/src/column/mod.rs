pub mod column_parser;
pub mod column_type;
pub mod column_value;
