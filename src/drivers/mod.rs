pub mod max30102;
pub mod registers;
