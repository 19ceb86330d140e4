// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! Element capabilities: buffer injection and extraction, keyframe requests
//! and typed property access.
//!
//! Property values are checked against the element's `ParamSpec` before they
//! are applied, so a wrong name, type or range is reported as an error instead
//! of tripping GLib's own assertions.

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use gstbridge::{BusSender, Element, Error, GraphMessage, MediaBuffer, PropertyValue, Result};

use crate::CAT;

/// One named element of a [`crate::GstGraph`].
#[derive(Debug, Clone)]
pub struct GstElement {
    element: gst::Element,
}

impl GstElement {
    pub fn new(element: gst::Element) -> Self {
        Self { element }
    }

    pub fn element(&self) -> &gst::Element {
        &self.element
    }

    fn appsrc(&self) -> Result<&gst_app::AppSrc> {
        self.element
            .downcast_ref::<gst_app::AppSrc>()
            .ok_or_else(|| Error::Engine(format!("{} is not an appsrc", self.element.name())))
    }

    fn appsink(&self) -> Result<&gst_app::AppSink> {
        self.element
            .downcast_ref::<gst_app::AppSink>()
            .ok_or_else(|| Error::Engine(format!("{} is not an appsink", self.element.name())))
    }

    fn pspec(&self, name: &str) -> Result<glib::ParamSpec> {
        self.element
            .find_property(name)
            .ok_or_else(|| Error::PropertyNotFound {
                element: self.name(),
                property: name.to_owned(),
            })
    }

    fn type_error(&self, property: &str, reason: String) -> Error {
        Error::PropertyType {
            element: self.name(),
            property: property.to_owned(),
            reason,
        }
    }
}

impl Element for GstElement {
    fn name(&self) -> String {
        self.element.name().to_string()
    }

    fn inject(&self, buffer: MediaBuffer) -> Result<()> {
        let appsrc = self.appsrc()?;
        let mut gst_buffer = if buffer.payload.is_empty() {
            gst::Buffer::new()
        } else {
            gst::Buffer::from_mut_slice(buffer.payload)
        };
        if let Some(duration) = buffer.duration {
            gst_buffer
                .make_mut()
                .set_duration(gst::ClockTime::from_nseconds(duration));
        }
        appsrc
            .push_buffer(gst_buffer)
            .map_err(|e| Error::Engine(format!("{} refused buffer: {:?}", appsrc.name(), e)))?;
        Ok(())
    }

    fn watch_samples(&self, bus: BusSender) -> Result<()> {
        let appsink = self.appsink()?;
        gst::debug!(
            CAT,
            obj = appsink,
            "Signalling samples to pipeline {}",
            bus.pipeline()
        );
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |_| {
                    if bus.post(GraphMessage::SampleReady) {
                        Ok(gst::FlowSuccess::Ok)
                    } else {
                        Err(gst::FlowError::Flushing)
                    }
                })
                .build(),
        );
        Ok(())
    }

    fn pull_sample(&self) -> Option<MediaBuffer> {
        let appsink = self.appsink().ok()?;
        let sample = appsink.try_pull_sample(gst::ClockTime::ZERO)?;
        let buffer = sample.buffer()?;
        let map = match buffer.map_readable() {
            Ok(map) => map,
            Err(e) => {
                gst::warning!(CAT, obj = appsink, "Failed to map sample: {}", e);
                return None;
            }
        };
        Some(MediaBuffer {
            payload: map.as_slice().to_vec(),
            duration: buffer.duration().map(gst::ClockTime::nseconds),
        })
    }

    fn request_keyframe(&self) -> Result<()> {
        let event = gst_video::UpstreamForceKeyUnitEvent::builder()
            .all_headers(true)
            .build();
        // Sent on the source pad so that the element itself receives it.
        let handled = match self.element.static_pad("src") {
            Some(pad) => pad.send_event(event),
            None => self.element.send_event(event),
        };
        if handled {
            gst::debug!(CAT, obj = self.element, "Keyframe requested");
            Ok(())
        } else {
            Err(Error::Engine(format!(
                "{} did not handle the keyframe request",
                self.element.name()
            )))
        }
    }

    fn property(&self, name: &str) -> Result<PropertyValue> {
        let pspec = self.pspec(name)?;
        if !pspec.flags().contains(glib::ParamFlags::READABLE) {
            return Err(self.type_error(name, "property is not readable".to_owned()));
        }
        let value = self.element.property_value(name);
        from_value(&value).ok_or_else(|| {
            self.type_error(name, format!("unsupported type {}", pspec.value_type()))
        })
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> Result<()> {
        let pspec = self.pspec(name)?;
        if !pspec.flags().contains(glib::ParamFlags::WRITABLE) {
            return Err(self.type_error(name, "property is not writable".to_owned()));
        }
        let converted = to_value(&pspec, &value).ok_or_else(|| {
            self.type_error(
                name,
                format!("{value:?} does not fit {}", pspec.value_type()),
            )
        })?;
        self.element.set_property_from_value(name, &converted);
        gst::debug!(CAT, obj = self.element, "Set {} to {:?}", name, value);
        Ok(())
    }
}

fn from_value(value: &glib::Value) -> Option<PropertyValue> {
    if let Ok(v) = value.get::<u32>() {
        return Some(PropertyValue::UInt(v.into()));
    }
    if let Ok(v) = value.get::<u64>() {
        return Some(PropertyValue::UInt(v));
    }
    if let Ok(v) = value.get::<i32>() {
        return Some(PropertyValue::Int(v.into()));
    }
    if let Ok(v) = value.get::<i64>() {
        return Some(PropertyValue::Int(v));
    }
    if let Ok(v) = value.get::<bool>() {
        return Some(PropertyValue::Bool(v));
    }
    if let Ok(v) = value.get::<Option<String>>() {
        return Some(PropertyValue::Str(v.unwrap_or_default()));
    }
    None
}

/// Converts `value` to the property's type, rejecting out-of-range integers.
fn to_value(pspec: &glib::ParamSpec, value: &PropertyValue) -> Option<glib::Value> {
    match value {
        PropertyValue::UInt(v) => integer_value(pspec, i128::from(*v)),
        PropertyValue::Int(v) => integer_value(pspec, i128::from(*v)),
        PropertyValue::Bool(v) if pspec.value_type() == glib::Type::BOOL => Some(v.to_value()),
        PropertyValue::Str(v) if pspec.value_type() == glib::Type::STRING => Some(v.to_value()),
        _ => None,
    }
}

fn integer_value(pspec: &glib::ParamSpec, v: i128) -> Option<glib::Value> {
    if let Some(spec) = pspec.downcast_ref::<glib::ParamSpecUInt>() {
        let v = u32::try_from(v).ok()?;
        (spec.minimum()..=spec.maximum())
            .contains(&v)
            .then(|| v.to_value())
    } else if let Some(spec) = pspec.downcast_ref::<glib::ParamSpecInt>() {
        let v = i32::try_from(v).ok()?;
        (spec.minimum()..=spec.maximum())
            .contains(&v)
            .then(|| v.to_value())
    } else if let Some(spec) = pspec.downcast_ref::<glib::ParamSpecUInt64>() {
        let v = u64::try_from(v).ok()?;
        (spec.minimum()..=spec.maximum())
            .contains(&v)
            .then(|| v.to_value())
    } else if let Some(spec) = pspec.downcast_ref::<glib::ParamSpecInt64>() {
        let v = i64::try_from(v).ok()?;
        (spec.minimum()..=spec.maximum())
            .contains(&v)
            .then(|| v.to_value())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(factory: &str) -> GstElement {
        gst::init().unwrap();
        GstElement::new(gst::ElementFactory::make(factory).build().unwrap())
    }

    #[test]
    fn unsigned_property_round_trip() {
        let queue = element("queue");
        queue
            .set_property("max-size-buffers", PropertyValue::UInt(42))
            .unwrap();
        assert_eq!(
            queue.property("max-size-buffers").unwrap(),
            PropertyValue::UInt(42)
        );
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        let queue = element("queue");
        let err = queue
            .set_property("max-size-buffers", PropertyValue::UInt(u64::MAX))
            .unwrap_err();
        assert!(matches!(err, Error::PropertyType { .. }));
        let err = queue
            .set_property("max-size-buffers", PropertyValue::Int(-1))
            .unwrap_err();
        assert!(matches!(err, Error::PropertyType { .. }));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let queue = element("queue");
        let err = queue
            .set_property("max-size-buffers", PropertyValue::Str("ten".to_owned()))
            .unwrap_err();
        assert!(matches!(err, Error::PropertyType { .. }));
    }

    #[test]
    fn unknown_property() {
        let queue = element("queue");
        assert!(matches!(
            queue.property("ssrc"),
            Err(Error::PropertyNotFound { .. })
        ));
    }

    #[test]
    fn string_and_bool_properties() {
        let sink = element("fakesink");
        sink.set_property("sync", PropertyValue::Bool(false)).unwrap();
        assert_eq!(sink.property("sync").unwrap(), PropertyValue::Bool(false));
        sink.set_property("name", PropertyValue::Str("out".to_owned()))
            .unwrap();
        assert_eq!(sink.name(), "out");
    }

    #[test]
    fn inject_requires_appsrc() {
        let queue = element("queue");
        assert!(matches!(
            queue.inject(MediaBuffer::copy_from_slice(b"x")),
            Err(Error::Engine(_))
        ));
        assert!(queue.pull_sample().is_none());
    }
}
