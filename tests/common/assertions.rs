use ffcut::engine::FfmpegCommand;

/// Check that `flag` is present and immediately followed by `value`
pub fn assert_flag_value(cmd: &FfmpegCommand, flag: &str, value: &str) {
    assert_eq!(
        cmd.value_of(flag),
        Some(value),
        "Expected '{} {}' in command.\nCommand: {}",
        flag,
        value,
        cmd
    );
}

pub fn assert_no_arg(cmd: &FfmpegCommand, arg: &str) {
    assert!(
        cmd.position(arg).is_none(),
        "Expected command to NOT contain '{}' but it did.\nCommand: {}",
        arg,
        cmd
    );
}

/// Check that `first` appears before `second`
pub fn assert_before(cmd: &FfmpegCommand, first: &str, second: &str) {
    let a = cmd
        .position(first)
        .unwrap_or_else(|| panic!("'{}' missing from {}", first, cmd));
    let b = cmd
        .position(second)
        .unwrap_or_else(|| panic!("'{}' missing from {}", second, cmd));
    assert!(
        a < b,
        "Expected '{}' before '{}'.\nCommand: {}",
        first,
        second,
        cmd
    );
}

/// Check that `expected` occurs in `cmd` as a contiguous run of arguments
pub fn assert_contains_run(cmd: &FfmpegCommand, expected: &[&str]) {
    let found = cmd
        .args()
        .windows(expected.len())
        .any(|w| w.iter().zip(expected).all(|(a, b)| a == b));
    assert!(
        found,
        "Expected run {:?} in command.\nCommand: {}",
        expected,
        cmd
    );
}
