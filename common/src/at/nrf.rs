use embassy_nrf::uarte::{UarteRxWithIdle, UarteTx};

use super::uart::{RxWithIdle, Tx};
use crate::error::Error;

impl Tx for UarteTx<'static> {
    async fn write(&mut self, buffer: &[u8]) -> crate::Result<()> {
        self.write(buffer).await.map_err(|_| Error::UartWriteError)
    }
}

impl RxWithIdle for UarteRxWithIdle<'static> {
    async fn read_until_idle(&mut self, buf: &mut [u8]) -> crate::Result<usize> {
        self.read_until_idle(buf).await.map_err(|_| Error::UartReadError)
    }
}
