use embassy_executor::{Executor, Spawner};
use embassy_sync::channel::Channel;
use embassy_time::{Delay, Duration};
use heapless::String;
use static_cell::StaticCell;
use psumon_common::at::response::ModemReplyBuffer;
use psumon_common::at::uart::{AtUart, RxWithIdle, Tx, rx_loop};
use psumon_common::config::ModemConfig;
use psumon_common::error::Error;
use psumon_common::frame::{MonitoringFrame, UplinkFrame};
use psumon_common::range::RangeLevel;
use psumon_common::uplink::SigfoxModem;
use psumon_common::RawMutex;

type RxChannelType = Channel<RawMutex, String<64>, 4>;
static RX_CHANNEL: RxChannelType = Channel::new();
static REPLIES: ModemReplyBuffer = ModemReplyBuffer::new();

/// Modem UART receiving whatever the fake modem answers.
struct FakeRxWithIdle {
    channel: &'static RxChannelType,
}

impl RxWithIdle for FakeRxWithIdle {
    async fn read_until_idle(&mut self, buf: &mut [u8]) -> psumon_common::Result<usize> {
        let reply = self.channel.receive().await;
        let bytes = reply.as_bytes();
        buf[..bytes.len()].clone_from_slice(bytes);
        Ok(bytes.len())
    }
}

/// Modem answering each expected command, commands without an answer are swallowed.
struct FakeModemTx {
    responses: Vec<(&'static str, Option<&'static str>)>,
    channel: &'static RxChannelType,
}

impl Tx for FakeModemTx {
    async fn write(&mut self, buffer: &[u8]) -> psumon_common::Result<()> {
        let command = core::str::from_utf8(buffer).map_err(|_| Error::StringEncodingError)?;
        let (expected, response) = self.responses.remove(0);
        assert_eq!(expected, command);
        if let Some(response) = response {
            let response = String::try_from(response).map_err(|_| Error::BufferTooSmallError)?;
            self.channel.send(response).await;
        }
        Ok(())
    }
}

#[embassy_executor::task]
async fn reader(rx: FakeRxWithIdle) {
    rx_loop(rx, &REPLIES).await;
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

#[test]
fn uplink_test() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(main(spawner).unwrap());
    });
}

#[embassy_executor::task]
async fn main(spawner: Spawner) {
    spawner.spawn(
        reader(FakeRxWithIdle {
            channel: &RX_CHANNEL,
        })
        .unwrap(),
    );

    let frame = MonitoringFrame {
        vout_mv: 0x1234,
        range: RangeLevel::Middle,
        iout_ua: 0x0A0B0C,
        vmcu_mv: 3300,
        tmcu_degrees: -12,
    };
    let tx = FakeModemTx {
        responses: vec![
            ("AT$RC\r", Some("\r\nOK\r\n")),
            ("AT$I=10\r", Some("\r\n0012AB\r\nOK\r\n")),
            ("AT$SB=1,2\r", Some("OK\r\n")),
            ("AT$SF=1234020A0B0C0CE48C\r", Some("OK\r\n")),
            ("AT$SF=0106\r", Some("ERROR\r\n")),
            ("AT$RC\r", None),
        ],
        channel: &RX_CHANNEL,
    };
    let config = ModemConfig {
        poll_interval: Duration::from_millis(10),
        reply_timeout: Duration::from_millis(50),
    };
    let mut modem = AtUart::new(tx, Delay, &REPLIES, config);

    assert_eq!(modem.reset().await, Ok(()));
    assert_eq!(modem.endpoint_id().await, Ok([0x00, 0x00, 0x12, 0xAB]));
    assert_eq!(modem.send_out_of_band_bit(true).await, Ok(()));
    assert_eq!(modem.send_uplink(&UplinkFrame::Monitoring(frame)).await, Ok(()));
    assert_eq!(modem.send_frame(&[0x01, 0x06]).await, Err(Error::AtErrorResponse));
    assert_eq!(modem.send_frame(&[0; 13]).await, Err(Error::PayloadTooLarge));
    assert_eq!(modem.reset().await, Err(Error::TimeoutError));

    std::process::exit(0);
}
