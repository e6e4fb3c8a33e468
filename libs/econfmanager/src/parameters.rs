//! Device parameter list
//!
//! Adding a parameter here adds its `ParameterId` variant, its descriptor
//! and its typed accessors.

use crate::catalog::{define_parameters, DefaultValue, Validation};

define_parameters! {
    DeviceSerialNumber {
        group: "device",
        field: "serial_number",
        const_name: "DEVICE_SERIAL_NUMBER",
        title: "Serial number",
        comment: "Device serial number, assigned during production",
        ty: String,
        default: DefaultValue::Str("0000"),
        access: ReadWrite(get_device_serial_number, set_device_serial_number),
        validation: Validation::MaxLength(32),
        polled: false,
        persistent: true,
    },
    DeviceName {
        group: "device",
        field: "name",
        const_name: "DEVICE_NAME",
        title: "Device name",
        comment: "Human readable name shown by discovery tools",
        ty: String,
        default: DefaultValue::Str("camera"),
        access: ReadWrite(get_device_name, set_device_name),
        validation: Validation::MaxLength(64),
        polled: false,
        persistent: true,
    },
    DeviceFirmwareVersion {
        group: "device",
        field: "firmware_version",
        const_name: "DEVICE_FIRMWARE_VERSION",
        title: "Firmware version",
        comment: "Reported by the sensor board",
        ty: String,
        default: DefaultValue::Str("0.0.0"),
        access: ReadOnly(get_device_firmware_version),
        validation: Validation::MaxLength(32),
        polled: true,
        persistent: true,
    },
    DeviceTemperature {
        group: "device",
        field: "temperature",
        const_name: "DEVICE_TEMPERATURE",
        title: "Sensor temperature",
        comment: "Degrees Celsius, sampled from hardware and never saved",
        ty: f32,
        default: DefaultValue::F32(0.0),
        access: ReadOnly(get_device_temperature),
        validation: Validation::None,
        polled: true,
        persistent: false,
    },
    DeviceUptimeSeconds {
        group: "device",
        field: "uptime_seconds",
        const_name: "DEVICE_UPTIME_SECONDS",
        title: "Uptime",
        comment: "Seconds since the sensor board powered up",
        ty: u64,
        default: DefaultValue::U64(0),
        access: ReadOnly(get_device_uptime_seconds),
        validation: Validation::None,
        polled: true,
        persistent: false,
    },
    DeviceCalibrationData {
        group: "device",
        field: "calibration_data",
        const_name: "DEVICE_CALIBRATION_DATA",
        title: "Calibration data",
        comment: "Sensor calibration table; factory copy shipped in the default-data dir",
        ty: Vec<u8>,
        default: DefaultValue::File("calibration.bin"),
        access: ReadWrite(get_device_calibration_data, set_device_calibration_data),
        validation: Validation::MaxLength(65536),
        polled: false,
        persistent: true,
    },
    DeviceAccessKey {
        group: "device",
        field: "access_key",
        const_name: "DEVICE_ACCESS_KEY",
        title: "Access key",
        comment: "Shared secret for remote maintenance, never readable",
        ty: String,
        default: DefaultValue::Str(""),
        access: WriteOnly(set_device_access_key),
        validation: Validation::MaxLength(64),
        polled: false,
        persistent: true,
    },
    ImageAcquisitionImageWidth {
        group: "image_acquisition",
        field: "image_width",
        const_name: "IMAGE_ACQUISITION_IMAGE_WIDTH",
        title: "Image width",
        comment: "Active sensor width in pixels",
        ty: i32,
        default: DefaultValue::I32(1920),
        access: ReadOnly(get_image_acquisition_image_width),
        validation: Validation::Range { min: 1.0, max: 8192.0 },
        polled: true,
        persistent: true,
    },
    ImageAcquisitionImageHeight {
        group: "image_acquisition",
        field: "image_height",
        const_name: "IMAGE_ACQUISITION_IMAGE_HEIGHT",
        title: "Image height",
        comment: "Active sensor height in pixels",
        ty: i32,
        default: DefaultValue::I32(1080),
        access: ReadOnly(get_image_acquisition_image_height),
        validation: Validation::Range { min: 1.0, max: 8192.0 },
        polled: true,
        persistent: true,
    },
    ImageAcquisitionExposure {
        group: "image_acquisition",
        field: "exposure",
        const_name: "IMAGE_ACQUISITION_EXPOSURE",
        title: "Exposure",
        comment: "Exposure time in milliseconds",
        ty: f64,
        default: DefaultValue::F64(10.0),
        access: ReadWrite(get_image_acquisition_exposure, set_image_acquisition_exposure),
        validation: Validation::Range { min: 0.01, max: 1000.0 },
        polled: false,
        persistent: true,
    },
    ImageAcquisitionGain {
        group: "image_acquisition",
        field: "gain",
        const_name: "IMAGE_ACQUISITION_GAIN",
        title: "Gain",
        comment: "Analog gain in dB",
        ty: f32,
        default: DefaultValue::F32(0.0),
        access: ReadWrite(get_image_acquisition_gain, set_image_acquisition_gain),
        validation: Validation::Range { min: 0.0, max: 48.0 },
        polled: false,
        persistent: true,
    },
    ImageAcquisitionAutoExposure {
        group: "image_acquisition",
        field: "auto_exposure",
        const_name: "IMAGE_ACQUISITION_AUTO_EXPOSURE",
        title: "Auto exposure",
        comment: "Let the sensor choose exposure and gain",
        ty: bool,
        default: DefaultValue::Bool(false),
        access: ReadWrite(get_image_acquisition_auto_exposure, set_image_acquisition_auto_exposure),
        validation: Validation::None,
        polled: false,
        persistent: true,
    },
    ImageAcquisitionFrameRate {
        group: "image_acquisition",
        field: "frame_rate",
        const_name: "IMAGE_ACQUISITION_FRAME_RATE",
        title: "Frame rate",
        comment: "Frames per second",
        ty: u32,
        default: DefaultValue::U32(30),
        access: ReadWrite(get_image_acquisition_frame_rate, set_image_acquisition_frame_rate),
        validation: Validation::Range { min: 1.0, max: 120.0 },
        polled: false,
        persistent: true,
    },
    ImageAcquisitionPixelFormat {
        group: "image_acquisition",
        field: "pixel_format",
        const_name: "IMAGE_ACQUISITION_PIXEL_FORMAT",
        title: "Pixel format",
        comment: "0 = Mono8, 1 = Mono12, 2 = RGB8",
        ty: i32,
        default: DefaultValue::I32(0),
        access: ReadWrite(get_image_acquisition_pixel_format, set_image_acquisition_pixel_format),
        validation: Validation::OneOf(&[0, 1, 2]),
        polled: false,
        persistent: true,
    },
    ImageAcquisitionTimestampOffsetNs {
        group: "image_acquisition",
        field: "timestamp_offset_ns",
        const_name: "IMAGE_ACQUISITION_TIMESTAMP_OFFSET_NS",
        title: "Timestamp offset",
        comment: "Signed correction added to frame timestamps, in nanoseconds",
        ty: i64,
        default: DefaultValue::I64(0),
        access: ReadWrite(
            get_image_acquisition_timestamp_offset_ns,
            set_image_acquisition_timestamp_offset_ns
        ),
        validation: Validation::None,
        polled: false,
        persistent: true,
    },
    NetworkIpAddress {
        group: "network",
        field: "ip_address",
        const_name: "NETWORK_IP_ADDRESS",
        title: "IP address",
        comment: "Static IPv4 address in dotted notation",
        ty: String,
        default: DefaultValue::Str("192.168.1.10"),
        access: ReadWrite(get_network_ip_address, set_network_ip_address),
        validation: Validation::MaxLength(15),
        polled: false,
        persistent: true,
    },
    NetworkPort {
        group: "network",
        field: "port",
        const_name: "NETWORK_PORT",
        title: "Control port",
        comment: "TCP port of the control endpoint",
        ty: u32,
        default: DefaultValue::U32(5000),
        access: ReadWrite(get_network_port, set_network_port),
        validation: Validation::Range { min: 1.0, max: 65535.0 },
        polled: false,
        persistent: true,
    },
}
