pub mod tripay;
