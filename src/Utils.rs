/// bracketing root finders
pub mod brent;
/// row reduction of linear systems
pub mod linalg;
pub mod logger;
/// damped Newton solver and the traits the equilibrium code solves through
pub mod nonlinear_solver;
