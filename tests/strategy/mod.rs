//! Strategy behaviour test modules.

mod bdd_steps;
mod scenarios;
mod test_helpers;
