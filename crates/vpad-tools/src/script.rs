//! Line-delimited JSON input scripts: one [`Frame`] per line. Applying a
//! frame only changes controller state; the caller sends the update.

use std::io::BufRead;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use vpad_client::{Ds4Controller, Gamepad, X360Controller};
use vpad_protocol::{DPad, Ds4Buttons, Ds4SpecialButtons, XusbButtons};

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Frame {
    pub reset: bool,
    pub press: Vec<String>,
    pub release: Vec<String>,
    pub special_press: Vec<String>,
    pub special_release: Vec<String>,
    pub dpad: Option<DPad>,
    pub left_stick: Option<[f32; 2]>,
    pub right_stick: Option<[f32; 2]>,
    pub left_trigger: Option<f32>,
    pub right_trigger: Option<f32>,
    pub hold_ms: Option<u64>,
}

/// Reads every frame up front so a bad line fails before anything is sent.
/// Blank lines and lines starting with `#` are skipped.
pub fn read_frames<R: BufRead>(reader: R) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.context("read_line failed")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let frame = serde_json::from_str(line)
            .with_context(|| format!("invalid JSON frame on line {}", n + 1))?;
        frames.push(frame);
    }
    Ok(frames)
}

impl Frame {
    pub fn hold(&self) -> Option<Duration> {
        self.hold_ms.map(Duration::from_millis)
    }

    pub fn apply_x360(&self, pad: &mut X360Controller) -> Result<()> {
        if !self.special_press.is_empty() || !self.special_release.is_empty() {
            bail!("x360 has no special buttons");
        }
        if self.dpad.is_some() {
            bail!("x360 d-pad is driven through DPAD_* buttons");
        }
        if self.reset {
            pad.reset();
        }
        pad.release_button(names::<XusbButtons>(&self.release)?);
        pad.press_button(names::<XusbButtons>(&self.press)?);
        if let Some([x, y]) = self.left_stick {
            pad.left_joystick_float(x, y);
        }
        if let Some([x, y]) = self.right_stick {
            pad.right_joystick_float(x, y);
        }
        if let Some(v) = self.left_trigger {
            pad.left_trigger_float(v);
        }
        if let Some(v) = self.right_trigger {
            pad.right_trigger_float(v);
        }
        Ok(())
    }

    pub fn apply_ds4(&self, pad: &mut Ds4Controller) -> Result<()> {
        if self.reset {
            pad.reset();
        }
        pad.release_button(names::<Ds4Buttons>(&self.release)?);
        pad.press_button(names::<Ds4Buttons>(&self.press)?);
        pad.release_special_button(names::<Ds4SpecialButtons>(&self.special_release)?);
        pad.press_special_button(names::<Ds4SpecialButtons>(&self.special_press)?);
        if let Some(direction) = self.dpad {
            pad.directional_pad(direction);
        }
        if let Some([x, y]) = self.left_stick {
            pad.left_joystick_float(x, y);
        }
        if let Some([x, y]) = self.right_stick {
            pad.right_joystick_float(x, y);
        }
        if let Some(v) = self.left_trigger {
            pad.left_trigger_float(v);
        }
        if let Some(v) = self.right_trigger {
            pad.right_trigger_float(v);
        }
        Ok(())
    }
}

/// Union of the flags named in `list`, matched case-insensitively against
/// the flag constant names.
fn names<F: bitflags::Flags>(list: &[String]) -> Result<F> {
    list.iter().try_fold(F::empty(), |acc, name| {
        let flag = F::from_name(&name.to_ascii_uppercase())
            .with_context(|| format!("unknown button {name:?}"))?;
        Ok(acc.union(flag))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpad_client::Bus;
    use vpad_client::driver::mock::MockDriver;

    #[test]
    fn parses_frames_and_skips_blanks() {
        let text = r#"
# wake up
{"press": ["a"], "hold_ms": 250}

{"release": ["A"], "left_stick": [0.0, 0.5], "dpad": "north_west"}
"#;
        let frames = read_frames(text.as_bytes()).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].press, vec!["a".to_string()]);
        assert_eq!(frames[0].hold(), Some(Duration::from_millis(250)));
        assert_eq!(frames[1].dpad, Some(DPad::NorthWest));
        assert_eq!(frames[1].left_stick, Some([0.0, 0.5]));
    }

    #[test]
    fn bad_line_reports_its_number() {
        let err = read_frames("{}\n{\"pres\": []}\n".as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"), "{err:#}");
    }

    #[test]
    fn button_names() {
        let b: XusbButtons = names(&["a".into(), "Left_Shoulder".into()]).unwrap();
        assert_eq!(b, XusbButtons::A | XusbButtons::LEFT_SHOULDER);
        assert!(names::<Ds4Buttons>(&["start".into()]).is_err());
        assert_eq!(names::<Ds4SpecialButtons>(&[]).unwrap(), Ds4SpecialButtons::empty());
    }

    #[test]
    fn ds4_frame_is_applied_and_sent() {
        let mock = MockDriver::new();
        let bus = Bus::new(mock.clone());
        let mut pad = Ds4Controller::new(&bus).unwrap();
        let frame = Frame {
            press: vec!["triangle".into(), "circle".into()],
            special_press: vec!["ps".into()],
            dpad: Some(DPad::North),
            left_trigger: Some(0.5),
            ..Default::default()
        };
        frame.apply_ds4(&mut pad).unwrap();
        pad.update().unwrap();

        let bytes = mock.last_report(pad.handle().target()).unwrap();
        assert_eq!(bytes[4..9], [0xC0, 0x00, 0x01, 128, 0]);
    }

    #[test]
    fn x360_rejects_ds4_only_fields() {
        let mock = MockDriver::new();
        let bus = Bus::new(mock.clone());
        let mut pad = X360Controller::new(&bus).unwrap();
        let frame = Frame { dpad: Some(DPad::South), ..Default::default() };
        assert!(frame.apply_x360(&mut pad).is_err());
        assert_eq!(mock.reports(pad.handle().target()).len(), 1);

        let frame = Frame { reset: true, press: vec!["guide".into()], ..Default::default() };
        frame.apply_x360(&mut pad).unwrap();
        pad.update().unwrap();
        assert_eq!(mock.reports(pad.handle().target()).len(), 2);
        assert_eq!(pad.report().buttons(), XusbButtons::GUIDE);
    }
}
