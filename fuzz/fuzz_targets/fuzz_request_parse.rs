#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_modbus_server::{ExceptionCode, ModbusRequest};

fuzz_target!(|data: &[u8]| {
    match ModbusRequest::parse(data) {
        Ok(request) => assert_eq!(Some(&request.function_code()), data.first()),
        Err(err) => assert!(matches!(
            ExceptionCode::from(&err),
            ExceptionCode::IllegalFunction | ExceptionCode::IllegalDataValue
        )),
    }
});
