//! Title/body/data rendering for every notification the relay sends.
//!
//! All functions here are total: unknown action or status codes fall back to
//! a generic message instead of failing.

use crate::domain::snapshot_differ::FieldChange;
use common::domain::{
    Absence, AndroidPriority, Complaint, DeliveryHints, QueueEntry, QueuePriority, Trip,
    COMPLAINTS_CHANNEL_ID, DEFAULT_CHANNEL_ID, STUDENT_CHANNEL_ID,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const DEFAULT_QUEUE_TITLE: &str = "إشعار جديد";
const UNSET_VALUE: &str = "غير محدد";
const RESPONSE_PREVIEW_CHARS: usize = 50;

const COMPLAINT_SUBMITTED_COLOR: &str = "#FF6B6B";
const COMPLAINT_RESPONSE_COLOR: &str = "#4CAF50";
const STUDENT_UPDATE_COLOR: &str = "#2196F3";

/// A rendered notification, ready for the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedNotification {
    pub title: String,
    pub body: String,
    pub notification_type: String,
    /// Flat string data sent with the push message and kept on the audit record
    pub data: BTreeMap<String, String>,
    pub hints: DeliveryHints,
    pub student_id: Option<String>,
    pub student_name: Option<String>,
}

impl FormattedNotification {
    fn new(title: String, body: String, notification_type: &str, hints: DeliveryHints) -> Self {
        Self {
            title,
            body,
            notification_type: notification_type.to_string(),
            data: BTreeMap::new(),
            hints,
            student_id: None,
            student_name: None,
        }
    }

    fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    fn with_student(mut self, id: Option<&str>, name: Option<&str>) -> Self {
        self.student_id = id.map(str::to_string);
        self.student_name = name.map(str::to_string);
        self
    }
}

fn navigation_params(key: &str, id: &str) -> String {
    let mut params = Map::new();
    params.insert(key.to_string(), Value::String(id.to_string()));
    params.insert("openDetails".to_string(), Value::Bool(true));
    Value::Object(params).to_string()
}

/// Render a JSON value as push data: strings verbatim, everything else as JSON
fn data_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => UNSET_VALUE.to_string(),
        Value::String(s) if s.is_empty() => UNSET_VALUE.to_string(),
        other => data_string(other),
    }
}

pub fn trip_notification(trip: &Trip) -> FormattedNotification {
    let name = trip.student_name.as_deref().unwrap_or("الطالب");
    let (title, body, notification_type) = match trip.action.as_str() {
        "boardBusToSchool" => (
            "🚌 ركب الباص",
            format!("{name} ركب الباص متجهاً إلى المدرسة"),
            "studentBoarded",
        ),
        "arriveAtSchool" => (
            "🏫 وصل المدرسة",
            format!("{name} وصل إلى المدرسة بأمان"),
            "tripEnded",
        ),
        "boardBusToHome" => (
            "🚌 ركب الباص",
            format!("{name} ركب الباص متجهاً إلى المنزل"),
            "studentBoarded",
        ),
        "arriveAtHome" => (
            "🏠 وصل المنزل",
            format!("{name} وصل إلى المنزل بأمان"),
            "tripEnded",
        ),
        "boardBus" => ("🚌 ركب الباص", format!("{name} ركب الباص"), "studentBoarded"),
        "leaveBus" => ("🚶 نزل من الباص", format!("{name} نزل من الباص"), "studentLeft"),
        _ => ("📢 تحديث رحلة", format!("تحديث جديد لرحلة {name}"), "general"),
    };

    FormattedNotification::new(
        title.to_string(),
        body,
        notification_type,
        DeliveryHints::channel(DEFAULT_CHANNEL_ID),
    )
    .with("tripId", trip.id.as_str())
    .with("studentId", trip.student_id.clone().unwrap_or_default())
    .with("studentName", name)
    .with("action", trip.action.as_str())
    .with_student(trip.student_id.as_deref(), trip.student_name.as_deref())
}

/// New absence request, addressed to admins and supervisors
pub fn absence_requested(absence: &Absence) -> FormattedNotification {
    let name = absence.student_name.as_deref().unwrap_or("طالب");
    FormattedNotification::new(
        "📝 طلب غياب جديد".to_string(),
        format!("طلب غياب جديد من {name}"),
        "absenceRequested",
        DeliveryHints::channel(DEFAULT_CHANNEL_ID),
    )
    .with("absenceId", absence.id.as_str())
    .with("studentId", absence.student_id.clone().unwrap_or_default())
    .with_student(absence.student_id.as_deref(), absence.student_name.as_deref())
}

/// Absence decision, addressed to the parent. Anything but "approved" reads
/// as a rejection.
pub fn absence_decided(absence: &Absence) -> FormattedNotification {
    let name = absence.student_name.as_deref().unwrap_or("طالبك");
    let approved = absence.status == "approved";
    let (title, verdict, notification_type) = if approved {
        ("✅ تمت الموافقة على الغياب", "قبوله", "absenceApproved")
    } else {
        ("❌ تم رفض الغياب", "رفضه", "absenceRejected")
    };

    FormattedNotification::new(
        title.to_string(),
        format!("طلب غياب {name} تم {verdict}"),
        notification_type,
        DeliveryHints::channel(DEFAULT_CHANNEL_ID),
    )
    .with("absenceId", absence.id.as_str())
    .with("studentId", absence.student_id.clone().unwrap_or_default())
    .with("status", absence.status.as_str())
    .with_student(absence.student_id.as_deref(), absence.student_name.as_deref())
}

/// New complaint, addressed to active admins
pub fn complaint_submitted(complaint: &Complaint) -> FormattedNotification {
    let parent_name = complaint.parent_name.as_deref().unwrap_or("ولي أمر");
    let title = complaint.title.as_deref().unwrap_or("شكوى جديدة");

    FormattedNotification::new(
        "🚨 شكوى جديدة من ولي أمر".to_string(),
        format!("{parent_name}: {title}"),
        "complaintSubmitted",
        DeliveryHints::custom_sound(
            COMPLAINTS_CHANNEL_ID,
            COMPLAINT_SUBMITTED_COLOR,
            "COMPLAINT_CATEGORY",
        ),
    )
    .with("complaintId", complaint.id.as_str())
    .with("parentId", complaint.parent_id.clone().unwrap_or_default())
    .with("parentName", complaint.parent_name.clone().unwrap_or_default())
    .with("title", complaint.title.clone().unwrap_or_default())
    .with("description", complaint.description.clone().unwrap_or_default())
    .with(
        "priority",
        complaint.priority.clone().unwrap_or_else(|| "normal".to_string()),
    )
    .with("navigationRoute", "/admin/complaints")
    .with(
        "navigationParams",
        navigation_params("complaintId", &complaint.id),
    )
}

/// What changed on a complaint the parent should hear about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplaintUpdate {
    Responded,
    StatusChanged,
}

/// Admin response or status change, addressed to the parent
pub fn complaint_updated(complaint: &Complaint, update: ComplaintUpdate) -> FormattedNotification {
    let title = complaint.title.as_deref().unwrap_or_default();
    let (heading, body) = match update {
        ComplaintUpdate::Responded => {
            let preview: String = complaint
                .admin_response
                .as_deref()
                .unwrap_or_default()
                .chars()
                .take(RESPONSE_PREVIEW_CHARS)
                .collect();
            (
                "✅ رد على شكواك",
                format!("تم الرد على شكوى \"{title}\". {preview}..."),
            )
        }
        ComplaintUpdate::StatusChanged => match complaint.status.as_deref() {
            Some("inProgress") | Some("in_progress") => (
                "⏳ شكواك قيد المعالجة",
                format!("شكوى \"{title}\" قيد المعالجة الآن"),
            ),
            Some("resolved") => ("✅ تم حل شكواك", format!("شكوى \"{title}\" تم حلها بنجاح")),
            Some("closed") => ("🔒 تم إغلاق شكواك", format!("شكوى \"{title}\" تم إغلاقها")),
            _ => (
                "📝 تحديث على شكواك",
                format!("تحديث جديد على شكوى \"{title}\""),
            ),
        },
    };

    FormattedNotification::new(
        heading.to_string(),
        body,
        "complaintResponded",
        DeliveryHints::custom_sound(
            COMPLAINTS_CHANNEL_ID,
            COMPLAINT_RESPONSE_COLOR,
            "COMPLAINT_RESPONSE_CATEGORY",
        ),
    )
    .with("complaintId", complaint.id.as_str())
    .with("complaintTitle", title)
    .with("description", complaint.description.clone().unwrap_or_default())
    .with("response", complaint.admin_response.clone().unwrap_or_default())
    .with("status", complaint.status.clone().unwrap_or_default())
    .with("navigationRoute", "/parent/complaints")
    .with(
        "navigationParams",
        navigation_params("complaintId", &complaint.id),
    )
}

/// Emoji and localized text for a student location status
fn status_text(status: &str) -> (&'static str, String) {
    match status {
        "home" | "atHome" => ("🏠", "في المنزل".to_string()),
        "onBus" | "inBus" => ("🚌", "في الباص".to_string()),
        "school" | "atSchool" => ("🏫", "في المدرسة".to_string()),
        other => ("📍", other.to_string()),
    }
}

pub fn status_changed(
    student_id: &str,
    student_name: &str,
    old_status: &str,
    new_status: &str,
) -> FormattedNotification {
    let (emoji, text) = status_text(new_status);

    FormattedNotification::new(
        format!("{emoji} {student_name} {text}"),
        format!("تم تحديث حالة {student_name} إلى: {text}"),
        "studentStatusChanged",
        DeliveryHints::channel(STUDENT_CHANNEL_ID),
    )
    .with("studentId", student_id)
    .with("studentName", student_name)
    .with("oldStatus", old_status)
    .with("newStatus", new_status)
    .with_student(Some(student_id), Some(student_name))
}

fn field_label(field: &str) -> &str {
    match field {
        "name" => "اسم الطالب",
        "schoolName" => "اسم المدرسة",
        "grade" => "الصف الدراسي",
        "busId" => "الباص المخصص",
        "parentName" => "اسم ولي الأمر",
        "parentPhone" => "رقم هاتف ولي الأمر",
        "address" => "العنوان",
        "notes" => "ملاحظات",
        other => other,
    }
}

/// One bullet line per changed field
pub fn describe_changes(changes: &BTreeMap<String, FieldChange>) -> String {
    changes
        .iter()
        .map(|(field, change)| {
            format!(
                "• {}: من \"{}\" إلى \"{}\"",
                field_label(field),
                display_value(&change.old),
                display_value(&change.new)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn student_data_updated(
    student_id: &str,
    student_name: &str,
    changes: &BTreeMap<String, FieldChange>,
) -> FormattedNotification {
    let changed_fields = serde_json::to_string(changes).unwrap_or_else(|_| "{}".to_string());

    FormattedNotification::new(
        "📝 تم تحديث بيانات الطالب".to_string(),
        format!(
            "تم تحديث بيانات {student_name} من قبل الإدارة\n\n{}",
            describe_changes(changes)
        ),
        "student_data_update",
        DeliveryHints::custom_sound(
            STUDENT_CHANNEL_ID,
            STUDENT_UPDATE_COLOR,
            "STUDENT_UPDATE_CATEGORY",
        ),
    )
    .with("studentId", student_id)
    .with("studentName", student_name)
    .with("changedFields", changed_fields)
    .with("navigationRoute", "/parent/students")
    .with("navigationParams", navigation_params("studentId", student_id))
    .with_student(Some(student_id), Some(student_name))
}

/// Notification for a client-enqueued queue entry
pub fn queue_entry_notification(entry: &QueueEntry) -> FormattedNotification {
    let channel_id = entry
        .data
        .get("channelId")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CHANNEL_ID);

    let mut hints = DeliveryHints::channel(channel_id);
    hints.android.priority = match entry.priority {
        QueuePriority::High => AndroidPriority::High,
        QueuePriority::Normal => AndroidPriority::Normal,
    };
    hints.apns.content_available = true;

    let notification_type = entry
        .data
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("general");

    let mut notification = FormattedNotification::new(
        entry
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_QUEUE_TITLE.to_string()),
        entry.body.clone().unwrap_or_default(),
        notification_type,
        hints,
    );
    for (key, value) in &entry.data {
        notification.data.insert(key.clone(), data_string(value));
    }
    notification.with("recipientId", entry.recipient_id.as_str())
}
