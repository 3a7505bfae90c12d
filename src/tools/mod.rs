pub mod blast;
pub mod modeller;
pub mod rcsb;
