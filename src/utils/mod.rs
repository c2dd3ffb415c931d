pub mod mask;

pub mod time;
