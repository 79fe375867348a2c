pub mod fixtures;

mod conditions;
mod grouping;
mod joins;
mod policy;
mod sorting;
