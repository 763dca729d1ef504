//! WiFi radio task
//! Owns the CYW43 chip and network stack, and feeds association results into
//! the join machine.

use cyw43::JoinOptions;
use cyw43_pio::{DEFAULT_CLOCK_DIVIDER, PioSpi};
use defmt::{debug, info, warn};
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_net::{Config, Stack, StackResources};
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{DMA_CH0, PIN_23, PIN_24, PIN_25, PIN_29, PIO0};
use embassy_rp::pio::{InterruptHandler, Pio};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::once_lock::OnceLock;
use embassy_time::{Duration, Instant, Timer};
use frame_core::{JoinAction, JoinMachine, Radio, RadioEvent, SessionCredentials};
use static_cell::StaticCell;

use crate::event::{RadioCommand, receive_command, send_command};

/// Network stack, available once the chip is up
pub static NET_STACK: OnceLock<Stack<'static>> = OnceLock::new();

/// WiFi peripherals needed for initialization
pub struct WifiPeripherals {
    pub pwr_pin: embassy_rp::Peri<'static, PIN_23>,
    pub cs_pin: embassy_rp::Peri<'static, PIN_25>,
    pub pio: embassy_rp::Peri<'static, PIO0>,
    pub dio_pin: embassy_rp::Peri<'static, PIN_24>,
    pub clk_pin: embassy_rp::Peri<'static, PIN_29>,
    pub dma_ch: embassy_rp::Peri<'static, DMA_CH0>,
}

/// The wake cycle's handle on the radio task.
pub struct RadioLink;

impl Radio for RadioLink {
    type Error = &'static str;

    fn bring_up(&mut self, credentials: &SessionCredentials) -> Result<(), Self::Error> {
        send_command(RadioCommand::Start(credentials.clone()))
            .map_err(|_| "radio command queue full")
    }

    fn shut_down(&mut self) {
        if send_command(RadioCommand::Stop).is_err() {
            warn!("Radio command queue full, stop dropped");
        }
    }
}

/// CYW43 runner task
#[embassy_executor::task]
async fn cyw43_task(
    runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>,
) -> ! {
    runner.run().await
}

/// Network stack runner task
#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}

/// Radio task: powers the chip on the first start request, then performs the
/// connect requests the join machine hands back until told to stop.
#[embassy_executor::task]
pub async fn radio_driver(
    spawner: Spawner,
    peripherals: WifiPeripherals,
    join: &'static JoinMachine<CriticalSectionRawMutex>,
) -> ! {
    info!("Radio task started");
    let credentials = loop {
        match receive_command().await {
            RadioCommand::Start(credentials) => break credentials,
            RadioCommand::Stop => debug!("Stop before start, ignored"),
        }
    };

    // Load CYW43 firmware
    info!("Loading CYW43 firmware...");
    let fw = include_bytes!("../../cyw43-firmware/43439A0.bin");
    let clm = include_bytes!("../../cyw43-firmware/43439A0_clm.bin");

    // Setup PIO for CYW43 SPI
    let pwr = Output::new(peripherals.pwr_pin, Level::Low);
    let cs = Output::new(peripherals.cs_pin, Level::High);

    // Bind interrupts for PIO
    embassy_rp::bind_interrupts!(struct Irqs {
        PIO0_IRQ_0 => InterruptHandler<PIO0>;
    });

    let mut pio = Pio::new(peripherals.pio, Irqs);
    let spi = PioSpi::new(
        &mut pio.common,
        pio.sm0,
        DEFAULT_CLOCK_DIVIDER,
        pio.irq0,
        cs,
        peripherals.dio_pin,
        peripherals.clk_pin,
        peripherals.dma_ch,
    );

    info!("Initializing CYW43 driver...");
    static STATE: StaticCell<cyw43::State> = StaticCell::new();
    let state = STATE.init(cyw43::State::new());
    let (net_device, mut control, runner) = cyw43::new(state, pwr, spi, fw).await;
    crate::spawn_unwrap(&spawner, cyw43_task(runner));

    control.init(clm).await;
    control
        .set_power_management(cyw43::PowerManagementMode::Performance)
        .await;

    static RESOURCES: StaticCell<StackResources<5>> = StaticCell::new();
    // Pseudo-random seed from current time
    let seed = Instant::now().as_micros();
    let (stack, runner) = embassy_net::new(
        net_device,
        Config::dhcpv4(Default::default()),
        RESOURCES.init(StackResources::new()),
        seed,
    );
    crate::spawn_unwrap(&spawner, net_task(runner));
    if NET_STACK.init(stack).is_err() {
        warn!("Network stack already published");
    }
    info!("WiFi chip initialized");

    let mut action = join.on_event(RadioEvent::StationStarted);
    loop {
        let command = match action {
            JoinAction::Connect => {
                match select(associate(&mut control, stack, &credentials), receive_command()).await
                {
                    Either::First(event) => {
                        action = join.on_event(event);
                        continue;
                    }
                    Either::Second(command) => command,
                }
            }
            JoinAction::None => receive_command().await,
        };
        match command {
            RadioCommand::Stop => break,
            RadioCommand::Start(_) => warn!("Radio already started, ignored"),
        }
    }

    info!("Disconnecting from WiFi...");
    disconnect_wifi(&mut control, &stack).await;

    // The cycle ends in a reset; nothing restarts the radio before that.
    loop {
        if let RadioCommand::Start(_) = receive_command().await {
            warn!("Radio restart within a cycle is not supported");
        }
    }
}

/// One association attempt, reported as the event the join machine expects.
async fn associate(
    control: &mut cyw43::Control<'static>,
    stack: Stack<'static>,
    credentials: &SessionCredentials,
) -> RadioEvent {
    info!("Joining WiFi network: {}", credentials.ssid());
    let joined = control
        .join(
            credentials.ssid(),
            JoinOptions::new(credentials.password().as_bytes()),
        )
        .await;
    if let Err(err) = joined {
        warn!("WiFi join failed: status {}", err.status);
        return RadioEvent::Disconnected { reason: err.status };
    }

    info!("WiFi connected, waiting for link...");
    stack.wait_link_up().await;
    info!("Waiting for DHCP...");
    stack.wait_config_up().await;
    if let Some(config) = stack.config_v4() {
        info!("IP address: {}", config.address);
    }
    RadioEvent::AddressAcquired
}

/// Disconnect from WiFi and wait for network stack to go down
async fn disconnect_wifi(control: &mut cyw43::Control<'static>, stack: &Stack<'_>) {
    control.leave().await;
    control.gpio_set(0, false).await;

    info!("Waiting for network stack to go DOWN...");
    let mut timeout_counter = 0;
    while stack.is_link_up() || stack.is_config_up() {
        Timer::after(Duration::from_millis(100)).await;
        timeout_counter += 1;
        if timeout_counter > 50 {
            warn!("Timeout waiting for network stack to go down");
            break;
        }
    }
    info!("Network stack is DOWN");

    // Aggressive power management for maximum power savings
    control
        .set_power_management(cyw43::PowerManagementMode::SuperSave)
        .await;
}
