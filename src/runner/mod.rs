pub mod each;
