// Grid-based Kohn-Sham exchange-correlation engine

pub mod basis;
pub mod config;
pub mod fock;
pub mod grid;
pub mod io;
pub mod ks_impl;
