#[allow(non_snake_case)]
pub mod Equilibria;
#[allow(non_snake_case)]
pub mod Examples;
#[allow(non_snake_case)]
pub mod Utils;
pub mod settings;
