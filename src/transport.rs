/// Trait for the link to the I2C master board.
/// Implement this trait for different transports (serial port, emulated board, etc.)
pub trait SysexTransport {
    /// Error type for transport operations
    type Error: std::fmt::Debug;

    /// Send one sysex message. `data` must already be 7-bit clean.
    fn send_sysex(&mut self, command: u8, data: &[u8]) -> Result<(), Self::Error>;

    /// Wait up to `timeout_ms` for the next reply message and return its data
    /// bytes, still 7-bit encoded. `None` when nothing arrived in time.
    fn recv_sysex(&mut self, timeout_ms: u32) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Clear the input buffer
    fn clear_input(&mut self) -> Result<(), Self::Error>;

    /// Release the underlying device
    fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
