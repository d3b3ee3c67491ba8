/// worked equilibrium problems
pub mod equilibria_examples;
