pub mod pid;
pub mod plane;
pub mod readout;
