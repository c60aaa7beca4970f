//! Page-side function declarations passed to `Runtime.callFunctionOn`.
//! `this` is the target element (or `document` for document scope).

pub const QUERY_ALL: &str = "function(selector) { return Array.from(this.querySelectorAll(selector)); }";

pub const CLOSEST: &str = "function(selector) { return this.closest(selector); }";

pub const PARENT: &str = "function() { return this.parentElement; }";

pub const PREVIOUS_SIBLING: &str = "function() { return this.previousElementSibling; }";

pub const ELEMENT_BY_ID: &str = "function(id) { return document.getElementById(id); }";

pub const DESCRIBE: &str = r#"function() {
  const attr = (name) => this.getAttribute ? this.getAttribute(name) : null;
  const maxLength = attr('maxlength');
  return {
    tag: (this.tagName || '').toLowerCase(),
    id: this.id || null,
    inputType: attr('type') ? attr('type').toLowerCase() : null,
    role: attr('role'),
    className: typeof this.className === 'string' ? this.className : '',
    maxLength: maxLength !== null && maxLength !== '' && !isNaN(Number(maxLength)) ? Number(maxLength) : null,
    contentEditable: attr('contenteditable') === 'true',
    hasValue: 'value' in this,
    hasClickHandler: typeof this.onclick === 'function',
    htmlFor: attr('for'),
    dropZoneAttr: this.hasAttribute ? (this.hasAttribute('dropzone') || this.hasAttribute('data-dropzone')) : false
  };
}"#;

pub const TEXT_CONTENT: &str = "function() { return this.textContent || ''; }";

pub const VALUE: &str = "function() { return this.value == null ? '' : String(this.value); }";

pub const LAYOUT: &str = r#"function() {
  const rect = this.getBoundingClientRect();
  const style = window.getComputedStyle(this);
  return {
    x: rect.left,
    y: rect.top,
    width: rect.width,
    height: rect.height,
    display: style.display,
    visibility: style.visibility,
    opacity: style.opacity,
    clientRects: this.getClientRects().length
  };
}"#;

pub const SCROLL_INTO_VIEW: &str =
    "function() { this.scrollIntoView({ block: 'center', inline: 'center' }); }";

pub const FOCUS: &str = "function() { if (typeof this.focus === 'function') this.focus(); }";

pub const DISPATCH: &str = r#"function(e) {
  let event;
  switch (e.event) {
    case 'pointer':
      event = new PointerEvent(e.kind, { bubbles: true, cancelable: true, clientX: e.x, clientY: e.y, pointerId: 1, pointerType: 'mouse', isPrimary: true });
      break;
    case 'mouse':
      event = new MouseEvent(e.kind, { bubbles: true, cancelable: true, clientX: e.x, clientY: e.y, button: 0 });
      break;
    case 'key':
      event = new KeyboardEvent(e.kind, { bubbles: true, cancelable: true, key: e.key, code: e.code || undefined });
      break;
    case 'beforeInput':
      event = new InputEvent('beforeinput', { bubbles: true, cancelable: true, inputType: e.inputType, data: e.data });
      break;
    case 'input':
      event = new Event('input', { bubbles: true });
      break;
    default:
      event = new Event('change', { bubbles: true });
  }
  this.dispatchEvent(event);
}"#;

pub const SET_VALUE: &str = r#"function(value) {
  const proto = this instanceof HTMLTextAreaElement
    ? HTMLTextAreaElement.prototype
    : this instanceof HTMLInputElement ? HTMLInputElement.prototype : null;
  const descriptor = proto && Object.getOwnPropertyDescriptor(proto, 'value');
  if (descriptor && descriptor.set) {
    descriptor.set.call(this, value);
  } else {
    this.value = value;
  }
}"#;

pub const SET_TEXT: &str = "function(text) { this.textContent = text; }";

pub const SELECTION: &str = r#"function() {
  try {
    return typeof this.selectionStart === 'number' ? [this.selectionStart, this.selectionEnd] : null;
  } catch (_) {
    return null;
  }
}"#;

pub const SET_SELECTION: &str = r#"function(start, end) {
  try { this.setSelectionRange(start, end); } catch (_) {}
}"#;

pub const ACTIVATE: &str = "function() { this.click(); }";

const BUILD_TRANSFER: &str = r#"const transfer = new DataTransfer();
  for (const f of files) {
    const raw = atob(f.data);
    const bytes = new Uint8Array(raw.length);
    for (let i = 0; i < raw.length; i++) bytes[i] = raw.charCodeAt(i);
    transfer.items.add(new File([bytes], f.name, { type: f.mime }));
  }"#;

pub fn assign_files() -> String {
    format!(
        "function(files) {{\n  {BUILD_TRANSFER}\n  try {{ this.files = transfer.files; }} catch (_) {{ return false; }}\n  return !!this.files && this.files.length === files.length;\n}}"
    )
}

pub fn dispatch_drag() -> String {
    format!(
        "function(phase, files) {{\n  {BUILD_TRANSFER}\n  this.dispatchEvent(new DragEvent(phase, {{ bubbles: true, cancelable: true, dataTransfer: transfer }}));\n}}"
    )
}
