use embassy_stm32::pac;
use embassy_stm32::rcc::*;
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::Config;

/// APB1 clock in MHz; the I2C timing registers are derived from it.
pub const PCLK1_MHZ: u8 = 42;

pub struct Board {
    pub p: embassy_stm32::Peripherals,
}

impl Board {
    pub fn init() -> Self {
        let mut config = Config::default();
        config.rcc.hse = Some(Hse {
            freq: TimeHertz(8_000_000), // Quartz 8 MHz
            mode: HseMode::Oscillator,
        });
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL168,
            divp: Some(PllPDiv::DIV2), // 168 MHz
            divq: Some(PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4; // 42 MHz
        config.rcc.apb2_pre = APBPrescaler::DIV2;

        let p = embassy_stm32::init(config);

        Self { p }
    }
}

/// Route the sensor data-ready pins to their EXTI lines, rising edge:
/// PC1 (accelerometer DRDY) on EXTI1, PB0 (gyroscope DRDY) on EXTI0.
pub fn init_drdy_lines() {
    pac::RCC.apb2enr().modify(|w| w.set_syscfgen(true));
    pac::SYSCFG.exticr(0).modify(|w| {
        w.set_exti(0, 1); // port B
        w.set_exti(1, 2); // port C
    });
    pac::EXTI.rtsr(0).modify(|w| {
        w.set_line(0, true);
        w.set_line(1, true);
    });
    pac::EXTI.imr(0).modify(|w| {
        w.set_line(0, true);
        w.set_line(1, true);
    });
}
