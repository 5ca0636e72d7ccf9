mod linear;
mod ring;

pub use linear::LinearBuffer;
pub use ring::RingBuffer;
