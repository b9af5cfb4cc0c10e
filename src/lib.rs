pub mod commands;
pub mod compressor;
pub mod connection;
pub mod device;
pub mod faults;
pub mod inverter;
pub mod modbus;
pub mod output;
pub mod registers;
pub mod values;
