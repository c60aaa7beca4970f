use std::sync::Arc;
use std::time::Duration;

use action_primitives::testing::{Element, MemoryDom};
use action_primitives::{ActionExecutor, DomPort};
use flow_model::{
    ActionSettings, CheckConditionStep, ClickStep, ConditionMode, FilePayload, FillTextStep,
    PageAction, SelectDropdownStep, SelectFilesStep,
};
use tokio::time::Instant;

fn settings(wait_ms: u64) -> ActionSettings {
    ActionSettings {
        selector_wait_ms: wait_ms,
        use_native_click: false,
    }
}

fn executor(dom: &Arc<MemoryDom>) -> ActionExecutor {
    ActionExecutor::new(dom.clone())
}

fn fill(selector: &str, value: &str) -> FillTextStep {
    FillTextStep {
        selector: selector.into(),
        value: value.into(),
        split_across_inputs: false,
        slow_type: false,
        slow_type_delay_ms: None,
    }
}

#[tokio::test(start_paused = true)]
async fn click_missing_selector_times_out() {
    let dom = Arc::new(MemoryDom::new());
    let started = Instant::now();
    let outcome = executor(&dom)
        .execute(
            &PageAction::Click(ClickStep {
                selector: "#missing".into(),
                force_click: false,
            }),
            &settings(300),
        )
        .await;
    assert!(!outcome.ok);
    assert_eq!(outcome.error.as_deref(), Some("selector_not_found"));
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn click_targets_clickable_ancestor_with_synthetic_sequence() {
    let dom = Arc::new(MemoryDom::new());
    let button = dom.append(&dom.root(), Element::new("button").id("go").visible());
    dom.append(&button, Element::new("span").class("icon"));

    let outcome = executor(&dom)
        .execute(
            &PageAction::Click(ClickStep {
                selector: "#go .icon".into(),
                force_click: false,
            }),
            &settings(1_000),
        )
        .await;
    assert!(outcome.ok);
    assert_eq!(
        dom.events(&button),
        vec![
            "pointerover", "pointerenter", "mouseover", "mouseenter", "pointerdown",
            "mousedown", "focus", "pointerup", "mouseup", "click"
        ]
    );
    assert!(dom.native_clicks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn forced_click_uses_native_then_falls_back() {
    let dom = Arc::new(MemoryDom::new());
    let link = dom.append(&dom.root(), Element::new("a").id("next").visible());
    let step = PageAction::Click(ClickStep {
        selector: "#next".into(),
        force_click: true,
    });

    assert!(executor(&dom).execute(&step, &settings(1_000)).await.ok);
    assert_eq!(dom.native_clicks(), vec![(60.0, 20.0)]);
    assert_eq!(dom.events(&link), vec!["scroll"]);

    dom.fail_native_clicks();
    assert!(executor(&dom).execute(&step, &settings(1_000)).await.ok);
    assert!(dom.events(&link).ends_with(&["mouseup".to_string(), "click".to_string()]));
}

#[tokio::test(start_paused = true)]
async fn rejected_synthetic_events_fall_back_to_element_click() {
    let dom = Arc::new(MemoryDom::new());
    let button = dom.append(&dom.root(), Element::new("button").id("go").visible());
    dom.reject_events(&button);
    let outcome = executor(&dom)
        .execute(
            &PageAction::Click(ClickStep {
                selector: "#go".into(),
                force_click: false,
            }),
            &settings(500),
        )
        .await;
    assert!(outcome.ok);
    assert_eq!(dom.events(&button), vec!["activate"]);
}

#[tokio::test(start_paused = true)]
async fn fill_resolves_wrapper_through_label() {
    let dom = Arc::new(MemoryDom::new());
    let wrapper = dom.append(&dom.root(), Element::new("div").id("date"));
    dom.append(&wrapper, Element::new("label").attr("for", "date-input"));
    let input = dom.append(&dom.root(), Element::new("input").id("date-input"));

    let outcome = executor(&dom)
        .execute(&PageAction::FillText(fill("#date", "2024-05-01")), &settings(500))
        .await;
    assert!(outcome.ok);
    assert_eq!(dom.value_of(&input).as_deref(), Some("2024-05-01"));
    assert_eq!(dom.events(&input), vec!["focus", "beforeinput", "input", "change"]);
}

#[tokio::test(start_paused = true)]
async fn fill_clicks_wrapper_to_reveal_input() {
    let dom = Arc::new(MemoryDom::new());
    let wrapper = dom.append(&dom.root(), Element::new("div").id("picker"));
    dom.reveal_on_activate(&wrapper, &wrapper, Element::new("input").class("late"));

    let outcome = executor(&dom)
        .execute(&PageAction::FillText(fill("#picker", "hello")), &settings(500))
        .await;
    assert!(outcome.ok);
    let input = dom.query(None, ".late").await.unwrap().unwrap();
    assert_eq!(dom.value_of(&input).as_deref(), Some("hello"));
}

#[tokio::test(start_paused = true)]
async fn fill_reports_non_editable_targets() {
    let dom = Arc::new(MemoryDom::new());
    dom.append(&dom.root(), Element::new("div").id("static"));
    let started = Instant::now();
    let outcome = executor(&dom)
        .execute(&PageAction::FillText(fill("#static", "x")), &settings(500))
        .await;
    assert_eq!(outcome.error.as_deref(), Some("selector_not_editable"));
    assert!(started.elapsed() >= Duration::from_millis(2_000));
}

#[tokio::test(start_paused = true)]
async fn slow_typing_replaces_existing_text() {
    let dom = Arc::new(MemoryDom::new());
    let input = dom.append(&dom.root(), Element::new("input").id("name").value("old"));
    let mut step = fill("#name", "ab");
    step.slow_type = true;
    step.slow_type_delay_ms = Some(20);

    let outcome = executor(&dom)
        .execute(&PageAction::FillText(step), &settings(500))
        .await;
    assert!(outcome.ok);
    assert_eq!(dom.value_of(&input).as_deref(), Some("ab"));
    let events = dom.events(&input);
    assert!(events.contains(&"keydown:a".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("change"));
}

#[tokio::test(start_paused = true)]
async fn split_fill_distributes_digits_single_char_boxes_first() {
    let dom = Arc::new(MemoryDom::new());
    let form = dom.append(&dom.root(), Element::new("div").class("otp"));
    let wide = dom.append(&form, Element::new("input").attr("maxlength", "6"));
    let boxes: Vec<_> = (0..3)
        .map(|_| dom.append(&form, Element::new("input").attr("maxlength", "1")))
        .collect();

    let mut step = fill(".otp", "Code 4-8-2");
    step.split_across_inputs = true;
    let outcome = executor(&dom)
        .execute(&PageAction::FillText(step), &settings(500))
        .await;
    assert!(outcome.ok);
    let values: Vec<_> = boxes.iter().map(|node| dom.value_of(node).unwrap()).collect();
    assert_eq!(values, vec!["4", "8", "2"]);
    assert_eq!(dom.value_of(&wide).as_deref(), Some(""));
    assert!(dom.events(&boxes[0]).contains(&"keydown:4".to_string()));
}

#[tokio::test(start_paused = true)]
async fn split_fill_waits_for_lazy_inputs() {
    let dom = Arc::new(MemoryDom::new());
    let form = dom.append(&dom.root(), Element::new("div").id("otp"));
    let first = dom.append(&form, Element::new("input"));

    let late_dom = dom.clone();
    let late_form = form.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        late_dom.append(&late_form, Element::new("input"));
    });

    let mut step = fill("#otp input", "12");
    step.split_across_inputs = true;
    let outcome = executor(&dom)
        .execute(&PageAction::FillText(step), &settings(1_000))
        .await;
    assert!(outcome.ok);
    assert_eq!(dom.value_of(&first).as_deref(), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn split_fill_runs_out_of_inputs() {
    let dom = Arc::new(MemoryDom::new());
    let form = dom.append(&dom.root(), Element::new("div").id("otp"));
    dom.append(&form, Element::new("input"));
    dom.append(&form, Element::new("input"));

    let mut step = fill("#otp", "123456");
    step.split_across_inputs = true;
    let outcome = executor(&dom)
        .execute(&PageAction::FillText(step), &settings(300))
        .await;
    assert_eq!(outcome.error.as_deref(), Some("insufficient_inputs"));
}

#[tokio::test(start_paused = true)]
async fn dropdown_matches_option_text() {
    let dom = Arc::new(MemoryDom::new());
    let control = dom.append(&dom.root(), Element::new("div").id("country"));
    let list = dom.append(&dom.root(), Element::new("ul"));
    dom.reveal_on_activate(&control, &list, Element::new("li").text("  France "));
    dom.reveal_on_activate(&control, &list, Element::new("li").text("Germany"));

    let outcome = executor(&dom)
        .execute(
            &PageAction::SelectDropdown(SelectDropdownStep {
                control_selector: "#country".into(),
                option_text: "GERM".into(),
                option_item_selector: None,
                timeout_ms: 1_000,
            }),
            &ActionSettings::default(),
        )
        .await;
    assert!(outcome.ok);
    let options = dom.query_all(None, "li").await.unwrap();
    assert_eq!(
        dom.events(&options[1]),
        vec!["scroll", "focus", "activate", "click", "keydown:Enter"]
    );
    assert!(dom.events(&options[0]).is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropdown_failures_are_distinct() {
    let dom = Arc::new(MemoryDom::new());
    dom.append(&dom.root(), Element::new("div").id("empty"));
    let step = |selector: &str, text: &str| {
        PageAction::SelectDropdown(SelectDropdownStep {
            control_selector: selector.into(),
            option_text: text.into(),
            option_item_selector: Some(".opt".into()),
            timeout_ms: 200,
        })
    };
    let exec = executor(&dom);
    let defaults = ActionSettings::default();
    assert_eq!(
        exec.execute(&step("#nope", "a"), &defaults).await.error.as_deref(),
        Some("control_not_found")
    );
    assert_eq!(
        exec.execute(&step("#empty", "a"), &defaults).await.error.as_deref(),
        Some("options_not_found")
    );
    dom.append(&dom.root(), Element::new("div").class("opt").text("Blue"));
    assert_eq!(
        exec.execute(&step("#empty", "red"), &defaults).await.error.as_deref(),
        Some("option_not_found")
    );
}

fn upload(selector: &str, files: Vec<FilePayload>) -> PageAction {
    PageAction::SelectFiles(SelectFilesStep {
        selector: selector.into(),
        files,
    })
}

fn payload(data_url: &str) -> FilePayload {
    FilePayload {
        name: "cv.txt".into(),
        mime: "text/plain".into(),
        size: 5,
        data_url: data_url.into(),
    }
}

#[tokio::test(start_paused = true)]
async fn files_attach_to_nested_input() {
    let dom = Arc::new(MemoryDom::new());
    let field = dom.append(&dom.root(), Element::new("div").id("upload"));
    let input = dom.append(&field, Element::new("input").attr("type", "file"));

    let outcome = executor(&dom)
        .execute(
            &upload("#upload", vec![payload("data:text/plain;base64,aGVsbG8=")]),
            &settings(500),
        )
        .await;
    assert!(outcome.ok);
    assert_eq!(dom.files_of(&input), vec!["cv.txt"]);
    assert_eq!(dom.events(&input), vec!["focus", "input", "change"]);
}

#[tokio::test(start_paused = true)]
async fn refused_file_list_falls_back_to_drop_zone() {
    let dom = Arc::new(MemoryDom::new());
    let zone = dom.append(&dom.root(), Element::new("section").class("file-drop"));
    let field = dom.append(&zone, Element::new("div").id("upload"));
    dom.append(&field, Element::new("input").attr("type", "file"));
    dom.reject_file_lists();

    let outcome = executor(&dom)
        .execute(
            &upload("#upload", vec![payload("data:text/plain;base64,aGVsbG8=")]),
            &settings(500),
        )
        .await;
    assert!(outcome.ok);
    assert_eq!(dom.events(&zone), vec!["dragenter", "dragover", "drop", "dragleave"]);
    assert_eq!(dom.files_of(&zone), vec!["cv.txt"]);
}

#[tokio::test(start_paused = true)]
async fn file_payload_errors() {
    let dom = Arc::new(MemoryDom::new());
    dom.append(&dom.root(), Element::new("input").id("f").attr("type", "file"));
    let exec = executor(&dom);
    assert_eq!(
        exec.execute(&upload("#f", vec![]), &settings(100)).await.error.as_deref(),
        Some("no_files")
    );
    assert_eq!(
        exec.execute(&upload("#f", vec![payload("not a data url")]), &settings(100))
            .await
            .error
            .as_deref(),
        Some("files_decode_failed")
    );
}

#[tokio::test(start_paused = true)]
async fn condition_checks_existence_and_visibility() {
    let dom = Arc::new(MemoryDom::new());
    dom.append(&dom.root(), Element::new("div").id("hidden"));
    dom.append(&dom.root(), Element::new("div").id("shown").visible());
    let exec = executor(&dom);
    let check = |selector: &str, mode, timeout_ms| {
        PageAction::CheckCondition(CheckConditionStep {
            selector: selector.into(),
            mode,
            timeout_ms,
        })
    };
    let defaults = ActionSettings::default();

    let exists = exec.execute(&check("#hidden", ConditionMode::Exists, 0), &defaults).await;
    assert_eq!(exists.as_bool(), Some(true));
    let visible = exec.execute(&check("#hidden", ConditionMode::Visible, 300), &defaults).await;
    assert!(visible.ok);
    assert_eq!(visible.as_bool(), Some(false));
    let shown = exec.execute(&check("#shown", ConditionMode::Visible, 300), &defaults).await;
    assert_eq!(shown.as_bool(), Some(true));
}

#[tokio::test(start_paused = true)]
async fn condition_sees_late_elements() {
    let dom = Arc::new(MemoryDom::new());
    let late_dom = dom.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(350)).await;
        late_dom.append(&late_dom.root(), Element::new("p").class("banner"));
    });
    let outcome = executor(&dom)
        .execute(
            &PageAction::CheckCondition(CheckConditionStep {
                selector: ".banner".into(),
                mode: ConditionMode::Exists,
                timeout_ms: 1_000,
            }),
            &ActionSettings::default(),
        )
        .await;
    assert_eq!(outcome.as_bool(), Some(true));
}
